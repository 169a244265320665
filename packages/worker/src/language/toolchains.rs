use common::Language;

use super::Toolchain;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

#[derive(Debug, Clone)]
pub struct Python {
    image: String,
}

impl Python {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

impl Toolchain for Python {
    fn language(&self) -> Language {
        Language::Python
    }

    fn source_file(&self) -> &str {
        "solution.py"
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn run_command(&self) -> Vec<String> {
        argv(&["python3", "solution.py"])
    }
}

#[derive(Debug, Clone)]
pub struct JavaScript {
    image: String,
}

impl JavaScript {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

impl Toolchain for JavaScript {
    fn language(&self) -> Language {
        Language::Javascript
    }

    fn source_file(&self) -> &str {
        "solution.js"
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn run_command(&self) -> Vec<String> {
        argv(&["node", "solution.js"])
    }
}

#[derive(Debug, Clone)]
pub struct Cpp {
    image: String,
}

impl Cpp {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

impl Toolchain for Cpp {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn source_file(&self) -> &str {
        "solution.cpp"
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn compile_command(&self) -> Option<Vec<String>> {
        Some(argv(&[
            "g++",
            "-std=c++17",
            "-O2",
            "-o",
            "solution",
            "solution.cpp",
        ]))
    }

    fn run_command(&self) -> Vec<String> {
        argv(&["./solution"])
    }

    /// g++ prefixes diagnostics with "error", linker failures included.
    fn is_compile_failure(&self, stderr: &str) -> bool {
        stderr.contains("error")
    }
}

/// Java submissions must declare `public class Main`.
#[derive(Debug, Clone)]
pub struct Java {
    image: String,
}

impl Java {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

impl Toolchain for Java {
    fn language(&self) -> Language {
        Language::Java
    }

    fn source_file(&self) -> &str {
        "Main.java"
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn compile_command(&self) -> Option<Vec<String>> {
        Some(argv(&["javac", "-J-Xmx256m", "Main.java"]))
    }

    fn run_command(&self) -> Vec<String> {
        argv(&["java", "-cp", ".", "Main"])
    }
}

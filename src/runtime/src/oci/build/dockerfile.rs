//! Build descriptor (Dockerfile) rendering.
//!
//! Provisioning emits a base image, then either a copy of the staged
//! inputs or a directory creation. Nothing else is ever generated.

use std::fmt;

/// A single descriptor instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `FROM <image>`
    From { image: String },
    /// `RUN <command>` (shell form)
    Run { command: String },
    /// `COPY <src> <dst>`
    Copy { src: String, dst: String },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::From { image } => write!(f, "FROM {}", image),
            Instruction::Run { command } => write!(f, "RUN {}", command),
            Instruction::Copy { src, dst } => write!(f, "COPY {} {}", src, dst),
        }
    }
}

/// Instructions in order, rendered one per line.
#[derive(Debug, Clone, PartialEq)]
pub struct Dockerfile {
    pub instructions: Vec<Instruction>,
}

impl Dockerfile {
    /// Start a descriptor on `image`.
    pub fn from_image(image: &str) -> Self {
        Self {
            instructions: vec![Instruction::From {
                image: image.to_string(),
            }],
        }
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for instruction in &self.instructions {
            out.push_str(&instruction.to_string());
            out.push('\n');
        }
        out
    }
}

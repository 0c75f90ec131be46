//! In-memory build contexts.
//!
//! A build context is the full set of files handed to an image build: a
//! generated descriptor plus any input files, staged under `inputs/` so they
//! can never collide with the descriptor.

use boxcall_core::error::{BoxcallError, Result};
use boxcall_core::JobInputs;

use super::dockerfile::{Dockerfile, Instruction};

/// Archive path of the generated descriptor.
pub const DESCRIPTOR_PATH: &str = "Dockerfile";

/// Directory that namespaces input files inside the context.
pub const INPUTS_DIR: &str = "inputs";

/// Ordered mapping of archive path → content.
///
/// Always holds exactly one descriptor entry. Entries keep insertion order,
/// which is the order they are written to the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildContext {
    entries: Vec<(String, Vec<u8>)>,
}

impl BuildContext {
    /// Iterate entries in archive order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, c)| c.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, path: String, content: Vec<u8>) {
        match self.entries.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => entry.1 = content,
            None => self.entries.push((path, content)),
        }
    }
}

/// Assemble the build context for a provisioned image.
///
/// With inputs the descriptor copies `inputs/` into `target_dir`. Without
/// inputs it creates `target_dir` instead, since a copy from an empty source
/// directory is not a valid build.
pub fn assemble_context(base_image: &str, inputs: &JobInputs, target_dir: &str) -> Result<BuildContext> {
    let mut dockerfile = Dockerfile::from_image(base_image);
    let mut context = BuildContext {
        entries: Vec::with_capacity(inputs.len() + 1),
    };

    if inputs.is_empty() {
        dockerfile.push(Instruction::Run {
            command: format!("mkdir -p {}", target_dir),
        });
    } else {
        dockerfile.push(Instruction::Copy {
            src: INPUTS_DIR.to_string(),
            dst: target_dir.to_string(),
        });
    }

    context.push(DESCRIPTOR_PATH.to_string(), dockerfile.render().into_bytes());

    for (name, content) in inputs {
        validate_input_name(name)?;
        context.push(format!("{}/{}", INPUTS_DIR, name), content.clone());
    }

    tracing::debug!(
        base_image,
        target_dir,
        inputs = inputs.len(),
        "Assembled build context"
    );

    Ok(context)
}

/// Input names are relative paths that stay inside `inputs/`.
fn validate_input_name(name: &str) -> Result<()> {
    let escapes = name
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..");
    if name.is_empty() || name.starts_with('/') || escapes {
        return Err(BoxcallError::InvalidArgument(format!(
            "Invalid input file name '{}'",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(pairs: &[(&str, &str)]) -> JobInputs {
        pairs
            .iter()
            .map(|(n, c)| (n.to_string(), c.as_bytes().to_vec()))
            .collect()
    }

    fn descriptor(context: &BuildContext) -> &str {
        std::str::from_utf8(context.get(DESCRIPTOR_PATH).unwrap()).unwrap()
    }

    #[test]
    fn test_empty_inputs_create_workdir() {
        let context = assemble_context("alpine:3.19", &JobInputs::new(), "/work").unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(descriptor(&context), "FROM alpine:3.19\nRUN mkdir -p /work\n");
    }

    #[test]
    fn test_inputs_are_copied_to_target_dir() {
        let context = assemble_context(
            "python:3.12",
            &inputs(&[("run_job.sh", "exec worker"), ("function.json", "{}")]),
            "/opt/job",
        )
        .unwrap();

        assert_eq!(descriptor(&context), "FROM python:3.12\nCOPY inputs /opt/job\n");
        assert_eq!(context.get("inputs/run_job.sh"), Some(&b"exec worker"[..]));
        assert_eq!(context.get("inputs/function.json"), Some(&b"{}"[..]));
    }

    #[test]
    fn test_input_named_like_descriptor_does_not_collide() {
        let context =
            assemble_context("alpine", &inputs(&[("Dockerfile", "user file")]), "/w").unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context.get("inputs/Dockerfile"), Some(&b"user file"[..]));
        assert_eq!(descriptor(&context), "FROM alpine\nCOPY inputs /w\n");
    }

    #[test]
    fn test_descriptor_is_first_entry() {
        let context = assemble_context("alpine", &inputs(&[("a", "1"), ("b", "2")]), "/w").unwrap();
        let paths: Vec<&str> = context.entries().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["Dockerfile", "inputs/a", "inputs/b"]);
    }

    #[test]
    fn test_rejects_escaping_input_names() {
        for name in ["../etc/passwd", "/abs", "a//b", ""] {
            let result = assemble_context("alpine", &inputs(&[(name, "x")]), "/w");
            assert!(
                matches!(result, Err(BoxcallError::InvalidArgument(_))),
                "{name} should be rejected"
            );
        }
    }
}

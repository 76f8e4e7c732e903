//! Repository scan and ARN resolution.
//!
//! Every `.tf` file under the root is parsed on its own; a file that fails
//! to read or parse is logged and left out, never failing the scan.
//! Resolution then makes two passes over the files in path order: first
//! for a resource whose `arn` attribute equals the ARN, then for one whose
//! name attribute or block label equals the name taken from the ARN.

use std::fs;
use std::path::{Path, PathBuf};

use error_handling_rs::{log_structured_error, Error, ResolutionFault, Result, Severity};
use shared_types_rs::{ContextBlock, MatchKind, ModuleContext, ResourceMatch};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::arn::extract_name;
use crate::hcl::{self, Block, Body};
use crate::mappings::{name_attributes, terraform_type_for};

const TF_EXTENSION: &str = "tf";

#[derive(Debug, Clone)]
pub struct ParsedFile {
    /// Relative to the resolver root
    pub path: PathBuf,
    pub source: String,
    pub body: Body,
}

impl ParsedFile {
    fn resources<'a>(&'a self, tf_type: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.body
            .blocks_of_kind("resource")
            .filter(move |b| b.labels.first().map(String::as_str) == Some(tf_type))
    }

    fn module_context(&self) -> ModuleContext {
        let mut context = ModuleContext::default();
        for block in &self.body.blocks {
            let target = match block.kind.as_str() {
                "provider" => &mut context.providers,
                "variable" => &mut context.variables,
                "output" => &mut context.outputs,
                "module" => &mut context.modules,
                _ => continue,
            };
            target.push(ContextBlock {
                kind: block.kind.clone(),
                labels: block.labels.clone(),
                raw: block.raw(&self.source).to_string(),
            });
        }
        context
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Parsed view of one repository checkout.
#[derive(Debug, Default)]
pub struct RepositoryIndex {
    files: Vec<ParsedFile>,
    skipped: Vec<SkippedFile>,
}

impl RepositoryIndex {
    /// Parses `(relative path, contents)` pairs. Files are ordered by path
    /// regardless of input order.
    pub fn from_sources<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = (PathBuf, String)>,
    {
        let mut sources: Vec<(PathBuf, String)> = sources.into_iter().collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));

        let mut index = Self::default();
        for (path, source) in sources {
            match hcl::parse(&source) {
                Ok(body) => index.files.push(ParsedFile { path, source, body }),
                Err(e) => index.skip(path, e.to_string()),
            }
        }
        index
    }

    fn skip(&mut self, path: PathBuf, reason: String) {
        let warning = Error::resolution(
            ResolutionFault::ParseWarning,
            format!("Skipping {}: {}", path.display(), reason),
        )
        .severity(Severity::Minor)
        .context("file_path", path.display().to_string());
        log_structured_error(&warning);
        self.skipped.push(SkippedFile { path, reason });
    }

    pub fn files(&self) -> &[ParsedFile] {
        &self.files
    }

    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }

    pub fn source(&self, path: &Path) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.source.as_str())
    }

    pub fn find(&self, resource_arn: &str, resource_type: &str) -> Result<ResourceMatch> {
        let resource_arn = resource_arn.trim();
        let Some(tf_type) = terraform_type_for(resource_type) else {
            warn!(resource_type = %resource_type, "Unsupported resource type");
            return Err(Error::resolution(
                ResolutionFault::NotFound,
                format!("Unsupported resource type {}", resource_type),
            )
            .context("resource_type", resource_type));
        };
        let name = extract_name(resource_arn);
        debug!(
            resource_arn = %resource_arn,
            terraform_type = tf_type,
            candidate_name = %name,
            files = self.files.len(),
            "Resolving resource"
        );

        let by_arn = self.files.iter().find_map(|file| {
            file.resources(tf_type)
                .find(|block| block.literal("arn") == Some(resource_arn))
                .map(|block| (file, block, MatchKind::Arn))
        });

        let attributes = name_attributes(tf_type);
        let found = by_arn.or_else(|| {
            self.files.iter().find_map(|file| {
                file.resources(tf_type)
                    .find(|block| {
                        attributes.iter().any(|attr| block.literal(attr) == Some(name))
                            || block.labels.get(1).map(String::as_str) == Some(name)
                    })
                    .map(|block| (file, block, MatchKind::Name))
            })
        });

        match found {
            Some((file, block, matched_by)) => {
                let resource_name = block.labels.get(1).cloned().unwrap_or_default();
                info!(
                    file_path = %file.path.display(),
                    terraform_type = tf_type,
                    resource_name = %resource_name,
                    matched_by = ?matched_by,
                    "Found resource"
                );
                Ok(ResourceMatch {
                    file_path: file.path.clone(),
                    resource_type: tf_type.to_string(),
                    resource_name,
                    raw_block: block.raw(&file.source).to_string(),
                    line: block.line,
                    matched_by,
                    module_context: file.module_context(),
                })
            }
            None => {
                warn!(
                    resource_arn = %resource_arn,
                    terraform_type = tf_type,
                    searched_files = self.files.len(),
                    "Resource not found"
                );
                Err(Error::resolution(
                    ResolutionFault::NotFound,
                    format!("No {} block matches {}", tf_type, resource_arn),
                )
                .context("resource_arn", resource_arn)
                .context("terraform_type", tf_type))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceResolver {
    root: PathBuf,
}

impl ResourceResolver {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads and parses every `.tf` file below the root, skipping hidden
    /// directories such as `.terraform` and `.git`.
    pub fn index(&self) -> Result<RepositoryIndex> {
        if !self.root.is_dir() {
            return Err(Error::resolution(
                ResolutionFault::RepositoryUnavailable,
                format!("Terraform root {} is not a directory", self.root.display()),
            ));
        }

        let mut sources = Vec::new();
        let mut unreadable = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file()
                || entry.path().extension().and_then(|e| e.to_str()) != Some(TF_EXTENSION)
            {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_path_buf();
            match fs::read_to_string(entry.path()) {
                Ok(source) => sources.push((relative, source)),
                Err(e) => unreadable.push((relative, e.to_string())),
            }
        }

        let mut index = RepositoryIndex::from_sources(sources);
        for (path, reason) in unreadable {
            index.skip(path, reason);
        }
        info!(
            root = %self.root.display(),
            parsed = index.files.len(),
            skipped = index.skipped.len(),
            "Indexed Terraform files"
        );
        Ok(index)
    }

    pub fn resolve(&self, resource_arn: &str, resource_type: &str) -> Result<ResourceMatch> {
        self.index()?.find(resource_arn, resource_type)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_handling_rs::ErrorKind;
    use tempfile::TempDir;

    fn repo(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        dir
    }

    const BUCKET_BY_LABEL: &str = r#"
resource "aws_s3_bucket" "bucket-a" {
  acl = "private"
}
"#;

    const BUCKET_BY_ARN: &str = r#"
provider "aws" {
  region = "us-east-1"
}

variable "env" {}

resource "aws_s3_bucket" "primary" {
  arn    = "arn:aws:s3:::bucket-a"
  bucket = "${var.env}-a"
}

output "bucket_id" {
  value = aws_s3_bucket.primary.id
}
"#;

    #[test]
    fn test_arn_attribute_beats_earlier_name_match() {
        let dir = repo(&[("a.tf", BUCKET_BY_LABEL), ("b.tf", BUCKET_BY_ARN)]);
        let found = ResourceResolver::new(dir.path())
            .resolve("arn:aws:s3:::bucket-a", "AWS::S3::Bucket")
            .unwrap();

        assert_eq!(found.file_path, PathBuf::from("b.tf"));
        assert_eq!(found.resource_name, "primary");
        assert_eq!(found.matched_by, MatchKind::Arn);
        assert_eq!(found.resource_type, "aws_s3_bucket");
        assert_eq!(found.line, 8);
        assert!(found.raw_block.starts_with("resource \"aws_s3_bucket\" \"primary\""));
    }

    #[test]
    fn test_module_context_from_same_file() {
        let dir = repo(&[("a.tf", BUCKET_BY_LABEL), ("b.tf", BUCKET_BY_ARN)]);
        let found = ResourceResolver::new(dir.path())
            .resolve("arn:aws:s3:::bucket-a", "S3::Bucket")
            .unwrap();

        let ctx = &found.module_context;
        assert_eq!(ctx.providers.len(), 1);
        assert_eq!(ctx.providers[0].labels, vec!["aws"]);
        assert_eq!(ctx.variables[0].labels, vec!["env"]);
        assert_eq!(ctx.outputs[0].labels, vec!["bucket_id"]);
        assert!(ctx.modules.is_empty());
    }

    #[test]
    fn test_bucket_attribute_match() {
        let dir = repo(&[(
            "storage/s3.tf",
            "resource \"aws_s3_bucket\" \"main\" {\n  bucket = \"bucket-a\"\n}\n",
        )]);
        let found = ResourceResolver::new(dir.path())
            .resolve("arn:x:s3:::bucket-a", "S3::Bucket")
            .unwrap();
        assert_eq!(found.file_path, PathBuf::from("storage/s3.tf"));
        assert_eq!(found.resource_name, "main");
        assert_eq!(found.matched_by, MatchKind::Name);
        assert!(found.module_context.is_empty());
    }

    #[test]
    fn test_type_specific_name_attribute() {
        let dir = repo(&[(
            "lambda.tf",
            "resource \"aws_lambda_function\" \"thumb\" {\n  function_name = \"resize\"\n  runtime = \"python3.12\"\n}\n",
        )]);
        let found = ResourceResolver::new(dir.path())
            .resolve(
                "arn:aws:lambda:us-east-1:123456789012:function:resize",
                "AWS::Lambda::Function",
            )
            .unwrap();
        assert_eq!(found.resource_name, "thumb");
    }

    #[test]
    fn test_ties_follow_path_order() {
        let block = "resource \"aws_sqs_queue\" \"q\" {\n  name = \"jobs\"\n}\n";
        let dir = repo(&[("z.tf", block), ("a/y.tf", block)]);
        let found = ResourceResolver::new(dir.path())
            .resolve("arn:aws:sqs:us-east-1:1:jobs", "AWS::SQS::Queue")
            .unwrap();
        assert_eq!(found.file_path, PathBuf::from("a/y.tf"));
    }

    #[test]
    fn test_malformed_file_is_isolated() {
        let valid = [("a.tf", BUCKET_BY_LABEL), ("b.tf", BUCKET_BY_ARN)];
        let clean = repo(&valid);
        let dirty = repo(&[
            valid[0],
            valid[1],
            ("broken.tf", "resource \"aws_s3_bucket\" \"x\" {\n  bucket = \"oops\n"),
        ]);

        let clean_index = ResourceResolver::new(clean.path()).index().unwrap();
        let dirty_index = ResourceResolver::new(dirty.path()).index().unwrap();
        assert_eq!(dirty_index.skipped().len(), 1);
        assert_eq!(dirty_index.skipped()[0].path, PathBuf::from("broken.tf"));
        assert_eq!(dirty_index.files().len(), clean_index.files().len());

        for (arn, kind) in [
            ("arn:aws:s3:::bucket-a", "AWS::S3::Bucket"),
            ("arn:aws:s3:::missing", "AWS::S3::Bucket"),
        ] {
            let a = clean_index.find(arn, kind).ok();
            let b = dirty_index.find(arn, kind).ok();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_hidden_directories_are_ignored() {
        let dir = repo(&[
            (".terraform/modules/m/main.tf", BUCKET_BY_ARN),
            ("main.tf", BUCKET_BY_LABEL),
        ]);
        let index = ResourceResolver::new(dir.path()).index().unwrap();
        assert_eq!(index.files().len(), 1);
        assert!(index.source(Path::new("main.tf")).is_some());
    }

    #[test]
    fn test_unknown_type_is_not_found() {
        let dir = repo(&[("a.tf", BUCKET_BY_LABEL)]);
        let err = ResourceResolver::new(dir.path())
            .resolve("arn:aws:s3:::bucket-a", "AWS::Made::Up")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution(ResolutionFault::NotFound));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_no_match_is_not_found() {
        let dir = repo(&[("a.tf", BUCKET_BY_LABEL)]);
        let err = ResourceResolver::new(dir.path())
            .resolve("arn:aws:s3:::other", "AWS::S3::Bucket")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution(ResolutionFault::NotFound));
    }

    #[test]
    fn test_missing_root_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = ResourceResolver::new(dir.path().join("nope"))
            .resolve("arn:aws:s3:::bucket-a", "AWS::S3::Bucket")
            .unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Resolution(ResolutionFault::RepositoryUnavailable)
        );
        assert!(err.is_retryable());
    }
}

//! Deployment artifact discovery and staging
//!
//! The deployment artifact lives in a local repository laid out as
//! `{root}/{group as path}/{name}/{version}/`. The stager picks the best
//! candidate file, copies it to the blob store, and publishes three
//! reserved outputs (`ArtifactS3Bucket`, `ArtifactS3Key`, `CodeSHA256`)
//! that templates consume to reference the staged code.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::audit::AuditSink;
use crate::cloud::ArtifactStore;
use crate::config::ArtifactConfig;
use crate::error::{Error, Result};
use crate::params::OutputParameterSet;

/// Locates artifact files and stages them to the blob store.
pub struct ArtifactStager {
    audit: Arc<dyn AuditSink>,
    override_grammar: Regex,
}

impl ArtifactStager {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            audit,
            override_grammar: Regex::new(
                r"^\^?((/[A-Za-z0-9:\[\]{}_ -])+(.[A-Za-z0-9_-]+)?|[A-Za-z0-9:\[\]{}_ -.]+)\$?$",
            )
            .unwrap(),
        }
    }

    /// List the artifact files for the configured identity.
    ///
    /// Candidates are the files in the version directory whose lowercased
    /// name ends with `.{kind}`. The repository root defaults to
    /// `~/.m2/repository` when the plan does not name one.
    pub fn locate_candidates(&self, config: &ArtifactConfig) -> Result<Vec<PathBuf>> {
        let root = match &config.repository {
            Some(path) => path.clone(),
            None => dirs::home_dir()
                .map(|home| home.join(".m2").join("repository"))
                .ok_or_else(|| {
                    Error::Config(
                        "No artifact repository configured and no home directory to default to."
                            .into(),
                    )
                })?,
        };
        let mut dir = root;
        for part in config.group.split('.') {
            dir.push(part);
        }
        dir.push(&config.name);
        dir.push(&config.version);

        let suffix = format!(".{}", config.kind);
        let entries = std::fs::read_dir(&dir)
            .map_err(|_| Error::Validation("No artifacts found to deploy".into()))?;
        let mut candidates = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && file_name(&path).to_lowercase().ends_with(&suffix) {
                candidates.push(path);
            }
        }
        Ok(candidates)
    }

    /// Stage the best candidate and publish the reserved outputs.
    ///
    /// Filenames containing `-SNAPSHOT` never deploy, and the optional
    /// filter keeps only names containing it. Of the survivors the first
    /// in descending filename order wins, which makes the highest version
    /// the deployed one under the usual `name-version.kind` naming.
    pub async fn stage(
        &self,
        store: &Arc<dyn ArtifactStore>,
        config: &ArtifactConfig,
        candidates: &[PathBuf],
        filter: Option<&str>,
        outputs: &mut OutputParameterSet,
    ) -> Result<()> {
        let noun = if candidates.len() == 1 {
            "artifact was"
        } else {
            "artifacts were"
        };
        self.audit
            .record(&format!("{} {noun} found.", candidates.len()));
        for path in candidates {
            self.audit.record(&path.display().to_string());
        }

        let mut survivors: Vec<&PathBuf> = candidates
            .iter()
            .filter(|path| {
                let name = file_name(path);
                !name.contains("-SNAPSHOT") && filter.map_or(true, |f| name.contains(f))
            })
            .collect();
        survivors.sort_by(|a, b| file_name(b).cmp(file_name(a)));
        let Some(file) = survivors.first() else {
            return Err(Error::Validation("No artifacts found to deploy".into()));
        };
        let name = file_name(file);

        self.audit.record(&format!("About to copy {name} to S3."));
        let key = match &config.prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.to_string(),
        };
        store.put_file(&config.bucket, &key, file).await?;
        self.audit.record(&format!(
            "{key} was copied to the s3 bucket ({}).",
            config.bucket
        ));

        let hash = base64_sha256(file).await?;
        self.audit
            .record(&format!("Base64 Encoded SHA256 HASH value: {hash}"));

        outputs.insert("ArtifactS3Bucket", config.bucket.clone());
        outputs.insert("ArtifactS3Key", key);
        outputs.insert("CodeSHA256", hash);
        Ok(())
    }

    /// Stage a unit's override artifact in place of the plan-level one.
    ///
    /// The expression must satisfy the override grammar. It splits at its
    /// last `/` into a directory (leading `^` stripped) and a filename
    /// pattern; with no `/` the working directory is searched with the
    /// whole expression. Exactly one entry may match.
    pub async fn stage_override(
        &self,
        store: &Arc<dyn ArtifactStore>,
        config: &ArtifactConfig,
        expression: &str,
        outputs: &mut OutputParameterSet,
    ) -> Result<()> {
        self.audit.record(&format!(
            "Finding a deployment artifact using regex: {expression}"
        ));
        if !self.override_grammar.is_match(expression) {
            return Err(Error::Validation(
                "Invalid deployment artifact regular expression.".into(),
            ));
        }

        let (dir, file_regex) = split_override(expression);
        let dir = match dir {
            Some(text) if !text.is_empty() => PathBuf::from(text),
            _ => std::env::current_dir()?,
        };
        let file = find_single_match(&dir, file_regex)?;

        self.audit
            .record(&format!("Deployment artifact: {}", file_name(&file)));
        tracing::info!("Deploying artifact to S3: {}", file_name(&file));
        self.stage(store, config, std::slice::from_ref(&file), None, outputs)
            .await
    }
}

/// Split an override expression at its last `/` into the directory part
/// (leading `^` stripped) and the filename pattern.
fn split_override(expression: &str) -> (Option<&str>, &str) {
    match expression.rfind('/') {
        Some(pos) => {
            let dir = expression[..pos]
                .strip_prefix('^')
                .unwrap_or(&expression[..pos]);
            (Some(dir), &expression[pos + 1..])
        }
        None => (None, expression),
    }
}

/// Find exactly one directory entry whose filename matches the pattern.
fn find_single_match(dir: &Path, file_regex: &str) -> Result<PathBuf> {
    let matcher = Regex::new(&format!("^(?:{file_regex})$")).map_err(|_| {
        Error::Validation("Invalid deployment artifact regular expression.".into())
    })?;
    let entries = std::fs::read_dir(dir)
        .map_err(|_| Error::Validation("Couldn't find deployment artifact.".into()))?;

    let mut matches = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if matcher.is_match(file_name(&path)) {
            matches.push(path);
        }
    }
    if matches.len() != 1 {
        return Err(Error::Validation(
            "Couldn't find deployment artifact.".into(),
        ));
    }
    Ok(matches.remove(0))
}

fn file_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
}

/// Base64 of the file's SHA-256 digest, read in chunks.
async fn base64_sha256(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(STANDARD.encode(hasher.finalize()))
}

//! CRD bundle preparation
//!
//! The federation API schema ships as a gzipped tarball. A URL source is
//! downloaded into the data path first; either way the tarball is unpacked
//! into the data path and the `*.yaml` files under `crds/bases` are
//! collected. The rest of the tree holds kustomize fragments and configs,
//! not complete CRDs.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::bufread::GzDecoder;
use meridian_common::retry::{retry_transient, Backoff};
use meridian_common::Error;
use tar::Archive;
use tracing::{debug, info};

const DOWNLOAD_ATTEMPTS: u32 = 3;
const CRD_KIND: &str = "CustomResourceDefinition";

/// Where the CRD tarball comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CrdSource {
    /// Downloaded over HTTP(S)
    Url(String),
    /// Already on the local filesystem
    Local(PathBuf),
}

impl CrdSource {
    /// `http://` / `https://` prefixes are URLs; anything else is a path
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.starts_with("http://") || s.starts_with("https://") {
            Self::Url(s.to_string())
        } else {
            Self::Local(PathBuf::from(s))
        }
    }
}

impl std::fmt::Display for CrdSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// An unpacked CRD bundle
#[derive(Clone, Debug, Default)]
pub struct CrdBundle {
    /// Directory the tarball was unpacked into
    pub root: PathBuf,
    /// CRD YAML files, sorted by path
    pub files: Vec<PathBuf>,
}

impl CrdBundle {
    /// Read every CRD document in the bundle, in file order.
    ///
    /// Empty documents (e.g. a trailing `---`) and documents of any other
    /// kind are dropped.
    pub fn documents(&self) -> Result<Vec<serde_json::Value>, Error> {
        let mut docs = Vec::new();
        for file in &self.files {
            let text = std::fs::read_to_string(file)?;
            let parsed = parse_documents(&text)
                .map_err(|e| Error::crd_bundle(format!("{}: {e}", file.display())))?;
            for doc in parsed {
                if doc.get("kind").and_then(|k| k.as_str()) == Some(CRD_KIND) {
                    docs.push(doc);
                } else {
                    debug!(file = %file.display(), "skipping non-CRD document");
                }
            }
        }
        Ok(docs)
    }
}

/// Split a multi-document YAML string into JSON values
pub fn parse_documents(text: &str) -> Result<Vec<serde_json::Value>, Error> {
    use serde::Deserialize;

    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = serde_json::Value::deserialize(doc)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Fetch (if remote) and unpack the bundle into `data_path`
pub async fn prepare(source: &CrdSource, data_path: &Path) -> Result<CrdBundle, Error> {
    tokio::fs::create_dir_all(data_path).await?;

    let archive = match source {
        CrdSource::Url(url) => {
            let file_name = url
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .unwrap_or("crds.tar.gz");
            let dest = data_path.join(file_name);
            info!(url = %url, dest = %dest.display(), "downloading CRD bundle");
            download(url, &dest).await?;
            dest
        }
        CrdSource::Local(path) => {
            info!(path = %path.display(), "using local CRD bundle");
            path.clone()
        }
    };

    let root = data_path.to_path_buf();
    tokio::task::spawn_blocking(move || unpack(&archive, &root))
        .await
        .map_err(|e| Error::internal("crds", format!("unpack task failed: {e}")))?
}

async fn download(url: &str, dest: &Path) -> Result<(), Error> {
    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| Error::internal("crds", format!("failed to build http client: {e}")))?;

    let bytes = retry_transient(&Backoff::attempts(DOWNLOAD_ATTEMPTS), "download CRD bundle", || {
        let client = client.clone();
        async move {
            let resp = client
                .get(url)
                .send()
                .await
                .map_err(|e| Error::transport("download CRD bundle", e.to_string()))?;
            let status = resp.status();
            if status.is_server_error() {
                return Err(Error::transport(
                    "download CRD bundle",
                    format!("{url} returned {status}"),
                ));
            }
            if !status.is_success() {
                return Err(Error::crd_bundle(format!("{url} returned {status}")));
            }
            resp.bytes()
                .await
                .map_err(|e| Error::transport("download CRD bundle", e.to_string()))
        }
    })
    .await
    .map_err(|e| match e {
        Error::CrdBundle(_) => e,
        other => Error::crd_bundle(other.to_string()),
    })?;

    tokio::fs::write(dest, &bytes).await?;
    debug!(bytes = bytes.len(), "CRD bundle downloaded");
    Ok(())
}

fn unpack(archive: &Path, root: &Path) -> Result<CrdBundle, Error> {
    let file = File::open(archive)
        .map_err(|e| Error::crd_bundle(format!("cannot open {}: {e}", archive.display())))?;
    let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.unpack(root)
        .map_err(|e| Error::crd_bundle(format!("cannot unpack {}: {e}", archive.display())))?;

    let bases = root.join("crds").join("bases");
    let mut files = Vec::new();
    if bases.is_dir() {
        collect_yaml(&bases, &mut files)?;
    }
    files.sort();
    if files.is_empty() {
        return Err(Error::crd_bundle(format!(
            "{} contains no CRD manifests",
            archive.display()
        )));
    }

    info!(count = files.len(), root = %root.display(), "CRD bundle unpacked");
    Ok(CrdBundle {
        root: root.to_path_buf(),
        files,
    })
}

fn collect_yaml(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), Error> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_yaml(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "yaml" || ext == "yml") {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    const CRD_A: &str = "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: clusters.cluster.karmada.io\n";
    const KUSTOMIZATION: &str = "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources:\n- bases/cluster.yaml\n";
    const KUSTOMIZE_CONFIG: &str = "nameReference:\n- kind: Service\n  version: v1\n";
    const CRD_B: &str = "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: works.work.karmada.io\n---\n";

    fn write_bundle(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("crds.tar.gz");
        let file = File::create(&path).expect("create tarball");
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, body.as_bytes())
                .expect("append entry");
        }
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip");
        path
    }

    #[test]
    fn source_parsing() {
        assert_eq!(
            CrdSource::parse("https://example.com/crds.tar.gz"),
            CrdSource::Url("https://example.com/crds.tar.gz".to_string())
        );
        assert_eq!(
            CrdSource::parse("/root/crds.tar.gz"),
            CrdSource::Local(PathBuf::from("/root/crds.tar.gz"))
        );
        // Only a scheme makes it a URL
        assert!(matches!(CrdSource::parse("httpd/crds.tar.gz"), CrdSource::Local(_)));
    }

    #[tokio::test]
    async fn story_local_bundle_is_unpacked_and_sorted() {
        let src = tempfile::tempdir().expect("tempdir");
        let data = tempfile::tempdir().expect("tempdir");
        let tarball = write_bundle(
            src.path(),
            &[
                ("crds/bases/work.yaml", CRD_B),
                ("crds/bases/cluster.yaml", CRD_A),
                ("crds/patches/webhook_in_clusters.yaml", "spec: {}\n"),
                ("crds/kustomization.yaml", KUSTOMIZATION),
                ("crds/kustomizeconfig.yaml", KUSTOMIZE_CONFIG),
                ("crds/README.md", "not a manifest"),
            ],
        );

        let bundle = prepare(&CrdSource::Local(tarball), data.path())
            .await
            .expect("bundle prepared");

        let names: Vec<_> = bundle
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["cluster.yaml", "work.yaml"]);

        let docs = bundle.documents().expect("documents parse");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["metadata"]["name"], "clusters.cluster.karmada.io");
        assert!(docs.iter().all(|d| d["kind"] == "CustomResourceDefinition"));
    }

    #[tokio::test]
    async fn non_crd_documents_in_bases_are_dropped() {
        let src = tempfile::tempdir().expect("tempdir");
        let data = tempfile::tempdir().expect("tempdir");
        let mixed = format!("{CRD_A}---\n{KUSTOMIZATION}---\n{KUSTOMIZE_CONFIG}");
        let tarball = write_bundle(src.path(), &[("crds/bases/mixed.yaml", mixed.as_str())]);

        let bundle = prepare(&CrdSource::Local(tarball), data.path())
            .await
            .expect("bundle prepared");
        let kinds: Vec<_> = bundle
            .documents()
            .expect("documents parse")
            .iter()
            .map(|d| d["kind"].as_str().unwrap_or("<none>").to_string())
            .collect();
        assert_eq!(kinds, vec!["CustomResourceDefinition"]);
    }

    #[tokio::test]
    async fn manifests_outside_bases_are_ignored() {
        let src = tempfile::tempdir().expect("tempdir");
        let data = tempfile::tempdir().expect("tempdir");
        let tarball = write_bundle(src.path(), &[("crds/kustomization.yaml", KUSTOMIZATION)]);

        let err = prepare(&CrdSource::Local(tarball), data.path())
            .await
            .expect_err("nothing under bases");
        assert!(err.to_string().contains("no CRD manifests"));
    }

    #[tokio::test]
    async fn missing_local_bundle_is_a_bundle_error() {
        let data = tempfile::tempdir().expect("tempdir");
        let err = prepare(
            &CrdSource::Local(data.path().join("absent.tar.gz")),
            data.path(),
        )
        .await
        .expect_err("no such file");
        assert!(matches!(err, Error::CrdBundle(_)));
    }

    #[tokio::test]
    async fn bundle_without_manifests_is_rejected() {
        let src = tempfile::tempdir().expect("tempdir");
        let data = tempfile::tempdir().expect("tempdir");
        let tarball = write_bundle(src.path(), &[("crds/README.md", "empty")]);

        let err = prepare(&CrdSource::Local(tarball), data.path())
            .await
            .expect_err("no manifests");
        assert!(err.to_string().contains("no CRD manifests"));
    }

    #[test]
    fn multi_document_yaml_skips_empty_documents() {
        let docs = parse_documents("---\na: 1\n---\n---\nb: 2\n").expect("valid yaml");
        assert_eq!(docs.len(), 2);
    }
}

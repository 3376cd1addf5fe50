//! Artifact records as loaded from the content repository.
//!
//! A record keeps the raw bytes untouched; only the metadata needed for
//! bundling (identity, resource type, id, declared dependencies) is
//! extracted when the record is built.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use regex_lite::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use super::identity::{ArtifactIdentity, ArtifactKind};

/// File encoding of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Structured text (FHIR JSON).
    Json,
    /// Markup (FHIR XML).
    Xml,
    /// CQL logic source text.
    Cql,
}

impl FromStr for Encoding {
    type Err = RecordError;

    /// Parse `json`, `xml` or `cql`, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            "cql" => Ok(Self::Cql),
            _ => Err(RecordError::UnknownEncoding(s.to_string())),
        }
    }
}

impl Encoding {
    /// Infer the encoding from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Cql => "cql",
        }
    }

    /// MIME type used when publishing.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/fhir+json",
            Self::Xml => "application/fhir+xml",
            Self::Cql => "text/cql",
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Self::Json
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Error produced while decoding an artifact file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The file extension is not a known encoding.
    #[error("unrecognized file encoding: {0}")]
    UnknownEncoding(String),
    /// Markup resources cannot be decoded by this crate.
    #[error("markup resources are not decodable: {0}")]
    MarkupUnsupported(String),
    /// The content is not a well-formed resource.
    #[error("malformed resource: {0}")]
    Malformed(String),
}

/// A loaded artifact: identity, declared dependencies and raw content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Identity of the artifact.
    pub identity: ArtifactIdentity,
    /// FHIR resource type (`Library`, `Measure`, `Patient`, ...).
    pub resource_type: String,
    /// Logical resource id, if the file carries one.
    pub id: Option<String>,
    /// Path the record was loaded from.
    pub source_path: PathBuf,
    /// Declared dependencies in declaration order.
    pub declared_dependencies: Vec<ArtifactIdentity>,
    /// Untransformed file bytes.
    #[serde(skip)]
    pub raw_content: Vec<u8>,
    /// Encoding of `raw_content`.
    pub encoding: Encoding,
}

impl ArtifactRecord {
    /// Decode a record from raw file bytes.
    ///
    /// `kind_hint` overrides the kind derived from the resource type; test
    /// scenario files pass `Some(ArtifactKind::TestScenario)`.
    pub fn parse(
        path: &Path,
        raw_content: Vec<u8>,
        kind_hint: Option<ArtifactKind>,
    ) -> Result<Self, RecordError> {
        let encoding = Encoding::from_path(path)
            .ok_or_else(|| RecordError::UnknownEncoding(path.display().to_string()))?;

        match encoding {
            Encoding::Json => parse_json(path, raw_content, kind_hint),
            Encoding::Cql => parse_cql(path, raw_content),
            Encoding::Xml => Err(RecordError::MarkupUnsupported(path.display().to_string())),
        }
    }

    /// Whether the record has a logical id.
    pub fn is_anonymous(&self) -> bool {
        self.id.as_deref().map_or(true, str::is_empty)
    }

    /// Parsed JSON content (for JSON-encoded records).
    pub fn json(&self) -> Result<Value, RecordError> {
        serde_json::from_slice(&self.raw_content).map_err(|e| RecordError::Malformed(e.to_string()))
    }

    /// Declared dependencies of the given kind.
    pub fn dependencies_of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &ArtifactIdentity> {
        self.declared_dependencies.iter().filter(move |d| d.kind == kind)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_json(
    path: &Path,
    raw_content: Vec<u8>,
    kind_hint: Option<ArtifactKind>,
) -> Result<ArtifactRecord, RecordError> {
    let value: Value = serde_json::from_slice(&raw_content)
        .map_err(|e| RecordError::Malformed(format!("{}: {}", path.display(), e)))?;

    let resource_type = value
        .get("resourceType")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RecordError::Malformed(format!("{}: missing resourceType", path.display())))?
        .to_string();

    let kind = kind_hint
        .or_else(|| ArtifactKind::from_resource_type(&resource_type))
        .ok_or_else(|| {
            RecordError::Malformed(format!(
                "{}: unsupported resource type {}",
                path.display(),
                resource_type
            ))
        })?;

    let id = value
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| id.clone())
        .unwrap_or_else(|| file_stem(path));

    let mut identity = ArtifactIdentity::new(kind, name);
    if let Some(version) = value.get("version").and_then(Value::as_str) {
        identity = identity.with_version(version);
    }

    Ok(ArtifactRecord {
        identity,
        resource_type,
        id,
        source_path: path.to_path_buf(),
        declared_dependencies: json_dependencies(&value),
        raw_content,
        encoding: Encoding::Json,
    })
}

/// Collect `depends-on` related artifacts plus a measure's `library` list.
///
/// Handles both the R4 (`resource` canonical string) and DSTU3
/// (`resource.reference`) shapes. Duplicates keep their first position.
fn json_dependencies(value: &Value) -> Vec<ArtifactIdentity> {
    let mut deps: Vec<ArtifactIdentity> = Vec::new();
    let mut push = |reference: &str| {
        if let Some(identity) = ArtifactIdentity::from_canonical(reference) {
            if !deps.contains(&identity) {
                deps.push(identity);
            }
        }
    };

    if let Some(related) = value.get("relatedArtifact").and_then(Value::as_array) {
        for artifact in related {
            if artifact.get("type").and_then(Value::as_str) != Some("depends-on") {
                continue;
            }
            let reference = match artifact.get("resource") {
                Some(Value::String(s)) => Some(s.as_str()),
                Some(Value::Object(obj)) => obj.get("reference").and_then(Value::as_str),
                _ => None,
            };
            if let Some(reference) = reference {
                push(reference);
            }
        }
    }

    if let Some(libraries) = value.get("library").and_then(Value::as_array) {
        for library in libraries {
            let reference = match library {
                Value::String(s) => Some(s.as_str()),
                Value::Object(obj) => obj.get("reference").and_then(Value::as_str),
                _ => None,
            };
            if let Some(reference) = reference {
                push(reference);
            }
        }
    }

    deps
}

fn library_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*library\s+"?([A-Za-z0-9_.]+)"?(?:\s+version\s+'([^']+)')?"#)
            .expect("library header pattern is valid")
    })
}

fn include_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*include\s+"?([A-Za-z0-9_.]+)"?(?:\s+version\s+'([^']+)')?"#)
            .expect("include header pattern is valid")
    })
}

/// Scan the `library` and `include` declarations of a CQL source.
///
/// This reads header lines only; the logic itself is never compiled.
fn parse_cql(path: &Path, raw_content: Vec<u8>) -> Result<ArtifactRecord, RecordError> {
    let text = std::str::from_utf8(&raw_content)
        .map_err(|e| RecordError::Malformed(format!("{}: {}", path.display(), e)))?;

    let identity = match library_header().captures(text) {
        Some(caps) => {
            let id = ArtifactIdentity::library(&caps[1]);
            match caps.get(2) {
                Some(v) => id.with_version(v.as_str()),
                None => id,
            }
        }
        None => ArtifactIdentity::library(file_stem(path)),
    };

    let declared_dependencies = include_header()
        .captures_iter(text)
        .map(|caps| {
            let id = ArtifactIdentity::library(&caps[1]);
            match caps.get(2) {
                Some(v) => id.with_version(v.as_str()),
                None => id,
            }
        })
        .collect();

    Ok(ArtifactRecord {
        identity,
        resource_type: "Library".to_string(),
        id: None,
        source_path: path.to_path_buf(),
        declared_dependencies,
        raw_content,
        encoding: Encoding::Cql,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_library_with_dependencies() {
        let json = br#"{
            "resourceType": "Library",
            "id": "X",
            "name": "X",
            "version": "1.0.0",
            "relatedArtifact": [
                {"type": "depends-on", "resource": "http://example.org/fhir/Library/Shared|1.0.0"},
                {"type": "depends-on", "resource": "http://example.org/fhir/ValueSet/diabetes"},
                {"type": "documentation", "resource": "http://example.org/fhir/Library/Docs"}
            ]
        }"#;
        let record = ArtifactRecord::parse(Path::new("library-X.json"), json.to_vec(), None).unwrap();

        assert_eq!(record.identity, ArtifactIdentity::library("X").with_version("1.0.0"));
        assert_eq!(record.id.as_deref(), Some("X"));
        assert_eq!(record.declared_dependencies.len(), 2);
        assert_eq!(
            record.dependencies_of_kind(ArtifactKind::ValueSet).next(),
            Some(&ArtifactIdentity::value_set("diabetes"))
        );
    }

    #[test]
    fn test_parse_dstu3_reference_shape() {
        let json = br#"{
            "resourceType": "Library",
            "id": "X",
            "relatedArtifact": [
                {"type": "depends-on", "resource": {"reference": "Library/Shared"}}
            ]
        }"#;
        let record = ArtifactRecord::parse(Path::new("library-X.json"), json.to_vec(), None).unwrap();
        assert_eq!(record.declared_dependencies, vec![ArtifactIdentity::library("Shared")]);
    }

    #[test]
    fn test_measure_library_reference_is_a_dependency() {
        let json = br#"{"resourceType": "Measure", "id": "X", "library": ["Library/X"]}"#;
        let record = ArtifactRecord::parse(Path::new("measure-X.json"), json.to_vec(), None).unwrap();
        assert_eq!(record.identity.kind, ArtifactKind::Measure);
        assert_eq!(record.declared_dependencies, vec![ArtifactIdentity::library("X")]);
    }

    #[test]
    fn test_anonymous_scenario_uses_file_stem() {
        let json = br#"{"resourceType": "Patient"}"#;
        let record = ArtifactRecord::parse(
            Path::new("tests/X/p1/patient.json"),
            json.to_vec(),
            Some(ArtifactKind::TestScenario),
        )
        .unwrap();

        assert!(record.is_anonymous());
        assert_eq!(record.resource_type, "Patient");
        assert_eq!(record.identity.name, "patient");
    }

    #[test]
    fn test_unknown_resource_type_without_hint() {
        let json = br#"{"resourceType": "Patient", "id": "p"}"#;
        let err = ArtifactRecord::parse(Path::new("p.json"), json.to_vec(), None).unwrap_err();
        assert!(matches!(err, RecordError::Malformed(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = ArtifactRecord::parse(Path::new("library-X.json"), b"{not json".to_vec(), None).unwrap_err();
        assert!(matches!(err, RecordError::Malformed(_)));
    }

    #[test]
    fn test_markup_is_rejected() {
        let err = ArtifactRecord::parse(Path::new("library-X.xml"), b"<Library/>".to_vec(), None).unwrap_err();
        assert!(matches!(err, RecordError::MarkupUnsupported(_)));
    }

    #[test]
    fn test_parse_cql_header() {
        let cql = b"library X version '1.0.0'\n\nusing FHIR version '4.0.1'\n\ninclude FHIRHelpers version '4.0.1' called FHIRHelpers\ninclude Shared called S\n";
        let record = ArtifactRecord::parse(Path::new("X.cql"), cql.to_vec(), None).unwrap();

        assert_eq!(record.encoding, Encoding::Cql);
        assert_eq!(record.identity, ArtifactIdentity::library("X").with_version("1.0.0"));
        assert_eq!(
            record.declared_dependencies,
            vec![
                ArtifactIdentity::library("FHIRHelpers").with_version("4.0.1"),
                ArtifactIdentity::library("Shared"),
            ]
        );
    }

    #[test]
    fn test_cql_headers_scanned_across_records() {
        let a = ArtifactRecord::parse(Path::new("A.cql"), b"library A\ninclude B".to_vec(), None).unwrap();
        let b = ArtifactRecord::parse(Path::new("B.cql"), b"library B version '2'".to_vec(), None).unwrap();

        assert_eq!(a.declared_dependencies, vec![ArtifactIdentity::library("B")]);
        assert_eq!(b.identity, ArtifactIdentity::library("B").with_version("2"));
        assert!(b.declared_dependencies.is_empty());
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("JSON".parse::<Encoding>(), Ok(Encoding::Json));
        assert_eq!("xml".parse::<Encoding>(), Ok(Encoding::Xml));
        assert_eq!(
            "yaml".parse::<Encoding>(),
            Err(RecordError::UnknownEncoding("yaml".to_string()))
        );
        assert_eq!(Encoding::from_path(Path::new("tests/X/p1.cql")), Some(Encoding::Cql));
        assert_eq!(Encoding::from_path(Path::new("README")), None);
    }
}

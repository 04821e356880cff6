use crate::definition::{BuildDefinition, GadgetType};
use crate::schema;
use serde_yaml::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Structural violation: unknown key, missing key, wrong type or value.
    Schema,
    MissingUrl,
    DependentKey,
    InvalidPpa,
    PathNotAbsolute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: ErrorKind,
    /// Colon-separated path of the offending field.
    pub key: String,
    pub value: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        kind: ErrorKind,
        key: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    fn missing_url(gadget_type: GadgetType) -> Self {
        Self::new(
            ErrorKind::MissingUrl,
            "gadget:type",
            gadget_type.to_string(),
            format!(
                "When key gadget:type is specified as {gadget_type}, a URL must be provided"
            ),
        )
    }

    fn dependent_key(key: &str, requires: &str) -> Self {
        Self::new(
            ErrorKind::DependentKey,
            key,
            requires,
            format!("Key {key} cannot be used without key {requires}"),
        )
    }

    fn invalid_ppa(name: &str) -> Self {
        Self::new(
            ErrorKind::InvalidPpa,
            "customization:extra-ppas",
            name,
            format!("Fingerprint is required for private PPAs (ppa: {name})"),
        )
    }

    fn path_not_absolute(key: &str, path: &str) -> Self {
        Self::new(
            ErrorKind::PathNotAbsolute,
            key,
            path,
            format!("Key {key} needs to be an absolute path ({path})"),
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Aggregated outcome of validating one definition.
///
/// A definition is accepted only when `errors` is empty. Warnings never
/// affect validity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed:")?;
        for e in &self.errors {
            write!(f, "\n- {e}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read definition file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse definition: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{0}")]
    Invalid(ValidationResult),
}

const MKDIR_KEY: &str = "customization:manual:mkdir:destination";
const COPY_KEY: &str = "customization:manual:copy-file:destination";
const TOUCH_KEY: &str = "customization:manual:touch-file:path";

/// Validate raw definition text.
///
/// Returns the decoded definition (with defaults applied) whenever the text
/// is structurally valid, together with every schema and business-rule
/// violation. Nothing short-circuits: the business rules run over the raw
/// document even when the schema pass has already failed.
pub fn validate_str(
    input: &str,
) -> Result<(Option<BuildDefinition>, ValidationResult), DefinitionError> {
    let raw: Value = serde_yaml::from_str(input)?;
    let mut result = ValidationResult {
        errors: schema::check(&raw),
        warnings: Vec::new(),
    };
    let schema_valid = result.is_valid();
    check_rules(&raw, &mut result.errors);

    let deb822 = raw
        .get("rootfs")
        .and_then(|r| r.get("sources-list-deb822"))
        .and_then(Value::as_bool);
    result.warnings = deb822_warnings(deb822);
    for w in &result.warnings {
        warn!("{w}");
    }

    if !schema_valid {
        return Ok((None, result));
    }
    let mut definition: BuildDefinition = serde_yaml::from_value(raw)?;
    definition.apply_defaults();

    Ok((Some(definition), result))
}

/// Read, decode and validate a definition file, failing on any violation.
pub fn load_definition(path: impl AsRef<Path>) -> Result<BuildDefinition, DefinitionError> {
    let content = fs::read_to_string(path)?;
    match validate_str(&content)? {
        (Some(def), result) if result.is_valid() => Ok(def),
        (_, result) => Err(DefinitionError::Invalid(result)),
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn items<'a>(value: Option<&'a Value>, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
}

/// Cross-field rules that the structural schema cannot express.
///
/// Works on the raw document so it can run alongside a failed schema pass;
/// fields of the wrong shape are skipped here because the schema pass
/// already reports them.
pub fn check_rules(raw: &Value, errors: &mut Vec<ValidationError>) {
    match raw.get("gadget").filter(|g| !g.is_null()) {
        Some(gadget) => {
            let gadget_type = match gadget.get("type").and_then(Value::as_str) {
                Some("git") => Some(GadgetType::Git),
                Some("directory") => Some(GadgetType::Directory),
                _ => None,
            };
            if let Some(gadget_type) = gadget_type {
                if non_empty_str(gadget, "url").is_none() {
                    errors.push(ValidationError::missing_url(gadget_type));
                }
            }
        }
        None => {
            let artifacts = raw.get("artifacts");
            let has = |key: &str| items(artifacts, key).next().is_some();
            let disk_key = ["img", "qcow2"].into_iter().find(|k| has(*k));
            if let Some(key) = disk_key {
                errors.push(ValidationError::dependent_key(key, "gadget:"));
            }
        }
    }

    let customization = raw.get("customization");

    for ppa in items(customization, "extra-ppas") {
        if non_empty_str(ppa, "auth").is_some() && non_empty_str(ppa, "fingerprint").is_none() {
            let name = ppa.get("name").and_then(Value::as_str).unwrap_or_default();
            errors.push(ValidationError::invalid_ppa(name));
        }
    }

    let manual = customization.and_then(|c| c.get("manual"));
    let targets = [
        (MKDIR_KEY, "mkdir", "path"),
        (COPY_KEY, "copy-file", "destination"),
        (TOUCH_KEY, "touch-file", "path"),
    ];
    for (key, list, field) in targets {
        for path in items(manual, list).filter_map(|i| i.get(field).and_then(Value::as_str)) {
            if !is_absolute_clean(path) {
                errors.push(ValidationError::path_not_absolute(key, path));
            }
        }
    }
}

/// `true` when `path` is rooted and never climbs with `..`.
pub fn is_absolute_clean(path: &str) -> bool {
    path.starts_with('/') && !path.split('/').any(|segment| segment == "..")
}

fn deb822_warnings(flag: Option<bool>) -> Vec<String> {
    let mut warnings = Vec::new();
    if flag.is_none() {
        warnings.push(
            "rootfs.sources-list-deb822 was not set. Please explicitly set the format desired \
             for sources list in your image definition."
                .to_owned(),
        );
    }
    let resolved = if flag == Some(true) {
        "rootfs.sources-list-deb822 is set to true. The DEB822 format will be used to \
         manage sources list. Please make sure you are not building an image older than noble."
    } else {
        "rootfs.sources-list-deb822 is set to false. The deprecated format will be used to \
         manage sources list. Please if possible adopt the new format."
    };
    warnings.push(resolved.to_owned());
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "name: test\narchitecture: amd64\nseries: noble\nclass: preinstalled\n";

    fn validate(extra: &str) -> (Option<BuildDefinition>, ValidationResult) {
        validate_str(&format!("{BASE}{extra}")).unwrap()
    }

    #[test]
    fn disk_artifact_without_gadget_is_dependent_key_error() {
        let (_, result) = validate("artifacts:\n  img:\n    - name: test.img\n");
        assert_eq!(result.errors.len(), 1);
        let e = &result.errors[0];
        assert_eq!(e.kind, ErrorKind::DependentKey);
        assert_eq!(e.key, "img");
        assert_eq!(e.value, "gadget:");
        assert_eq!(e.message, "Key img cannot be used without key gadget:");
    }

    #[test]
    fn manifest_only_artifacts_need_no_gadget() {
        let (def, result) = validate("artifacts:\n  manifest:\n    name: test.manifest\n");
        assert!(result.is_valid());
        assert!(def.is_some());
    }

    #[test]
    fn private_ppa_without_fingerprint_fails() {
        let (_, result) = validate(
            "customization:\n  extra-ppas:\n    - name: private/ppa\n      auth: user:pass\n    - name: public/ppa\n",
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ErrorKind::InvalidPpa);
        assert_eq!(result.errors[0].value, "private/ppa");
        assert!(result.errors[0].message.contains("private/ppa"));
    }

    #[test]
    fn private_ppa_with_fingerprint_passes() {
        let (_, result) = validate(
            "customization:\n  extra-ppas:\n    - name: private/ppa\n      auth: user:pass\n      fingerprint: ABCD\n",
        );
        assert!(result.is_valid());
    }

    #[test]
    fn git_gadget_requires_url() {
        let (_, result) = validate("gadget:\n  type: git\n");
        assert_eq!(result.errors.len(), 1);
        let e = &result.errors[0];
        assert_eq!(e.kind, ErrorKind::MissingUrl);
        assert_eq!(e.key, "gadget:type");
        assert_eq!(e.value, "git");
        assert_eq!(
            e.message,
            "When key gadget:type is specified as git, a URL must be provided"
        );
    }

    #[test]
    fn empty_url_counts_as_missing() {
        let (_, result) = validate("gadget:\n  type: directory\n  url: \"\"\n");
        assert!(result.has(ErrorKind::MissingUrl));
    }

    #[test]
    fn prebuilt_gadget_without_url_passes() {
        let (def, result) = validate("gadget:\n  type: prebuilt\nartifacts:\n  img:\n    - name: a.img\n");
        assert!(result.is_valid(), "{result}");
        assert!(def.unwrap().gadget.is_some());
    }

    #[test]
    fn relative_and_traversing_paths_rejected() {
        let (_, result) = validate(
            "customization:\n  manual:\n    mkdir:\n      - path: ../etc/passwd\n    copy-file:\n      - source: a\n        destination: relative/path\n    touch-file:\n      - path: /etc/../shadow\n",
        );
        let keys: Vec<&str> = result.errors.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec![MKDIR_KEY, COPY_KEY, TOUCH_KEY]);
        assert!(result.errors.iter().all(|e| e.kind == ErrorKind::PathNotAbsolute));
    }

    #[test]
    fn absolute_path_passes() {
        let (_, result) = validate(
            "customization:\n  manual:\n    mkdir:\n      - path: /etc/foo/bar\n    touch-file:\n      - path: /etc/foo/bar\n",
        );
        assert!(result.is_valid(), "{result}");
    }

    #[test]
    fn every_rule_reported_in_one_pass() {
        let (_, result) = validate(
            "artifacts:\n  qcow2:\n    - name: a.qcow2\ncustomization:\n  extra-ppas:\n    - name: p\n      auth: a\n  manual:\n    mkdir:\n      - path: rel\n",
        );
        assert!(result.has(ErrorKind::DependentKey));
        assert!(result.has(ErrorKind::InvalidPpa));
        assert!(result.has(ErrorKind::PathNotAbsolute));
    }

    #[test]
    fn deb822_warning_depends_on_flag() {
        let (def, unset) = validate("");
        assert_eq!(unset.warnings.len(), 2);
        assert!(unset.warnings[0].contains("was not set"));
        assert!(unset.warnings[1].contains("deprecated format"));
        assert_eq!(def.unwrap().rootfs.sources_list_deb822, Some(false));

        let (_, on) = validate("rootfs:\n  sources-list-deb822: true\n");
        assert_eq!(on.warnings.len(), 1);
        assert!(on.warnings[0].contains("DEB822 format will be used"));

        let (_, off) = validate("rootfs:\n  sources-list-deb822: false\n");
        assert!(off.warnings[0].contains("deprecated format"));
        assert!(off.is_valid());
    }

    #[test]
    fn business_rules_run_alongside_schema_errors() {
        let (def, result) = validate(
            "kernal: x\ngadget:\n  type: git\ncustomization:\n  manual:\n    mkdir:\n      - path: ../etc/passwd\n",
        );
        assert!(def.is_none());
        let kinds: Vec<ErrorKind> = result.errors.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ErrorKind::Schema, ErrorKind::MissingUrl, ErrorKind::PathNotAbsolute]
        );
        assert!(result.errors[0].message.contains("Additional property kernal"));
        assert_eq!(result.errors[2].value, "../etc/passwd");
    }

    #[test]
    fn rules_skip_fields_the_schema_rejected() {
        let (_, result) = validate(
            "gadget:\n  type: svn\nartifacts:\n  img: nope\ncustomization:\n  extra-ppas:\n    - auth: a\n",
        );
        assert!(!result.has(ErrorKind::MissingUrl));
        assert!(!result.has(ErrorKind::DependentKey));
        assert!(result.has(ErrorKind::InvalidPpa));
        assert!(result.has(ErrorKind::Schema));
    }

    #[test]
    fn schema_errors_skip_typed_decode() {
        let (def, result) = validate("gadget:\n  type: svn\n");
        assert!(def.is_none());
        assert_eq!(result.errors[0].key, "gadget:type");
    }

    #[test]
    fn load_definition_reports_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("def.yaml");
        std::fs::write(&path, format!("{BASE}gadget:\n  type: git\n")).unwrap();
        match load_definition(&path) {
            Err(DefinitionError::Invalid(result)) => {
                assert!(result.has(ErrorKind::MissingUrl));
                assert!(result.to_string().contains("a URL must be provided"));
            }
            other => panic!("expected invalid definition, got {other:?}"),
        }
    }

    #[test]
    fn is_absolute_clean_cases() {
        assert!(is_absolute_clean("/etc/foo/bar"));
        assert!(is_absolute_clean("/a..b/c"));
        assert!(!is_absolute_clean("relative/path"));
        assert!(!is_absolute_clean("../etc/passwd"));
        assert!(!is_absolute_clean("/etc/.."));
    }
}

//! Hand-written structural schema for build definitions.
//!
//! The tree below is checked against the raw YAML document before it is
//! decoded into [`crate::BuildDefinition`]. Keeping it separate from the
//! serde types means the accepted shape can be reviewed in one place.

use crate::validate::{ErrorKind, ValidationError};
use serde_yaml::Value;

#[derive(Debug)]
pub enum Node {
    Str,
    Bool,
    /// Non-negative integer that fits in `u32`.
    Int,
    Enum(&'static [&'static str]),
    List(&'static Node),
    Object(&'static [Field]),
}

#[derive(Debug)]
pub struct Field {
    pub key: &'static str,
    pub required: bool,
    pub node: Node,
}

const fn req(key: &'static str, node: Node) -> Field {
    Field {
        key,
        required: true,
        node,
    }
}

const fn opt(key: &'static str, node: Node) -> Field {
    Field {
        key,
        required: false,
        node,
    }
}

const POCKETS: &[&str] = &["release", "security", "updates", "proposed"];
const STR_LIST: Node = Node::List(&Node::Str);

const GADGET: &[Field] = &[
    req("type", Node::Enum(&["git", "directory", "prebuilt"])),
    opt("url", Node::Str),
    opt("branch", Node::Str),
    opt("target", Node::Str),
];

const SEED: &[Field] = &[
    req("urls", STR_LIST),
    req("names", STR_LIST),
    opt("branch", Node::Str),
    opt("vcs", Node::Bool),
];

const TARBALL: &[Field] = &[
    req("url", Node::Str),
    opt("gpg", Node::Str),
    opt("sha256sum", Node::Str),
];

const ROOTFS: &[Field] = &[
    opt("components", STR_LIST),
    opt("archive", Node::Str),
    opt("flavor", Node::Str),
    opt("mirror", Node::Str),
    opt("pocket", Node::Enum(POCKETS)),
    opt("sources-list-deb822", Node::Bool),
    opt("seed", Node::Object(SEED)),
    opt("tarball", Node::Object(TARBALL)),
];

const CLOUD_INIT: &[Field] = &[
    opt("meta-data", Node::Str),
    opt("user-data", Node::Str),
    opt("network-config", Node::Str),
];

const EXTRA_SNAP: &[Field] = &[
    req("name", Node::Str),
    opt("channel", Node::Str),
    opt("store", Node::Str),
    opt("revision", Node::Int),
];

const EXTRA_PPA: &[Field] = &[
    req("name", Node::Str),
    opt("fingerprint", Node::Str),
    opt("auth", Node::Str),
    opt("keep-enabled", Node::Bool),
];

const NAME_ONLY: &[Field] = &[req("name", Node::Str)];

const MKDIR: &[Field] = &[req("path", Node::Str), opt("permissions", Node::Int)];
const COPY_FILE: &[Field] = &[req("source", Node::Str), req("destination", Node::Str)];
const PATH_ONLY: &[Field] = &[req("path", Node::Str)];

const MANUAL: &[Field] = &[
    opt("mkdir", Node::List(&Node::Object(MKDIR))),
    opt("copy-file", Node::List(&Node::Object(COPY_FILE))),
    opt("touch-file", Node::List(&Node::Object(PATH_ONLY))),
    opt("execute", Node::List(&Node::Object(PATH_ONLY))),
];

const CUSTOMIZATION: &[Field] = &[
    opt("components", STR_LIST),
    opt("pocket", Node::Enum(POCKETS)),
    opt("preseed", Node::Bool),
    opt("cloud-init", Node::Object(CLOUD_INIT)),
    opt("extra-snaps", Node::List(&Node::Object(EXTRA_SNAP))),
    opt("extra-ppas", Node::List(&Node::Object(EXTRA_PPA))),
    opt("extra-packages", Node::List(&Node::Object(NAME_ONLY))),
    opt("manual", Node::Object(MANUAL)),
];

const IMAGE_ARTIFACT: &[Field] = &[req("name", Node::Str), opt("volume", Node::Str)];

const ARTIFACTS: &[Field] = &[
    opt("img", Node::List(&Node::Object(IMAGE_ARTIFACT))),
    opt("qcow2", Node::List(&Node::Object(IMAGE_ARTIFACT))),
    opt("manifest", Node::Object(NAME_ONLY)),
    opt("filelist", Node::Object(NAME_ONLY)),
];

const DEFINITION: &[Field] = &[
    req("name", Node::Str),
    opt("display-name", Node::Str),
    opt("revision", Node::Int),
    req("architecture", Node::Str),
    req("series", Node::Str),
    req("class", Node::Enum(&["preinstalled", "cloud", "installer"])),
    opt("kernel", Node::Str),
    opt("gadget", Node::Object(GADGET)),
    opt("rootfs", Node::Object(ROOTFS)),
    opt("customization", Node::Object(CUSTOMIZATION)),
    opt("artifacts", Node::Object(ARTIFACTS)),
];

/// Root of the build definition schema.
pub static ROOT: Node = Node::Object(DEFINITION);

/// Check `value` against `ROOT`, returning every violation found.
pub fn check(value: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    check_node(&ROOT, value, "", &mut errors);
    errors
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}:{key}")
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Sequence(_) => "array",
        Value::Mapping(_) => "object",
        Value::Tagged(_) => "tagged value",
    }
}

fn type_error(path: &str, expected: &str, value: &Value) -> ValidationError {
    let key = if path.is_empty() { "(root)" } else { path };
    ValidationError::new(
        ErrorKind::Schema,
        key,
        describe(value),
        format!(
            "{key}: Invalid type. Expected: {expected}, given: {}",
            describe(value)
        ),
    )
}

fn check_node(node: &Node, value: &Value, path: &str, errors: &mut Vec<ValidationError>) {
    match node {
        Node::Str => {
            if !value.is_string() {
                errors.push(type_error(path, "string", value));
            }
        }
        Node::Bool => {
            if !value.is_bool() {
                errors.push(type_error(path, "boolean", value));
            }
        }
        Node::Int => {
            let fits = value.as_u64().is_some_and(|n| u32::try_from(n).is_ok());
            if !fits {
                errors.push(type_error(path, "integer", value));
            }
        }
        Node::Enum(choices) => match value.as_str() {
            Some(s) if choices.contains(&s) => {}
            Some(s) => {
                let quoted: Vec<String> = choices.iter().map(|c| format!("\"{c}\"")).collect();
                errors.push(ValidationError::new(
                    ErrorKind::Schema,
                    path,
                    s,
                    format!(
                        "{path}: must be one of the following: {}",
                        quoted.join(", ")
                    ),
                ));
            }
            None => errors.push(type_error(path, "string", value)),
        },
        Node::List(item) => match value.as_sequence() {
            Some(items) => {
                for (i, v) in items.iter().enumerate() {
                    check_node(item, v, &format!("{path}[{i}]"), errors);
                }
            }
            None => errors.push(type_error(path, "array", value)),
        },
        Node::Object(fields) => match value.as_mapping() {
            Some(map) => check_object(fields, map, path, errors),
            None => errors.push(type_error(path, "object", value)),
        },
    }
}

fn check_object(
    fields: &[Field],
    map: &serde_yaml::Mapping,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    for (k, _) in map {
        match k.as_str() {
            Some(key) if fields.iter().any(|f| f.key == key) => {}
            Some(key) => {
                let at = if path.is_empty() { "(root)" } else { path };
                errors.push(ValidationError::new(
                    ErrorKind::Schema,
                    join(path, key),
                    key,
                    format!("{at}: Additional property {key} is not allowed"),
                ));
            }
            None => errors.push(type_error(path, "string keys", k)),
        }
    }

    for field in fields {
        let key_path = join(path, field.key);
        match map.get(field.key) {
            Some(v) => check_node(&field.node, v, &key_path, errors),
            None if field.required => errors.push(ValidationError::new(
                ErrorKind::Schema,
                key_path.clone(),
                "",
                format!("{key_path}: {} is required", field.key),
            )),
            None => {}
        }
    }
}

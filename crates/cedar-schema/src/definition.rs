use serde::{Deserialize, Serialize};
use std::fmt;

/// Image class declared at the top of a build definition.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageClass {
    Preinstalled,
    Cloud,
    Installer,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GadgetType {
    Git,
    Directory,
    Prebuilt,
}

impl fmt::Display for GadgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GadgetType::Git => write!(f, "git"),
            GadgetType::Directory => write!(f, "directory"),
            GadgetType::Prebuilt => write!(f, "prebuilt"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Pocket {
    #[default]
    Release,
    Security,
    Updates,
    Proposed,
}

/// The declarative description of one image build.
///
/// Decoded from YAML after the schema pass in [`crate::schema`] has accepted
/// the raw document, so every field here is already structurally valid.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuildDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub revision: u32,
    pub architecture: String,
    pub series: String,
    pub class: ImageClass,
    #[serde(default = "default_kernel")]
    pub kernel: String,
    #[serde(default)]
    pub gadget: Option<Gadget>,
    #[serde(default)]
    pub rootfs: Rootfs,
    #[serde(default)]
    pub customization: Option<Customization>,
    #[serde(default)]
    pub artifacts: Option<Artifacts>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Gadget {
    #[serde(rename = "type")]
    pub gadget_type: GadgetType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Rootfs {
    #[serde(default = "default_components")]
    pub components: Vec<String>,
    #[serde(default = "default_archive")]
    pub archive: String,
    #[serde(default = "default_archive")]
    pub flavor: String,
    #[serde(default = "default_mirror")]
    pub mirror: String,
    #[serde(default)]
    pub pocket: Pocket,
    /// Left as `None` when the definition does not mention it; the validator
    /// warns about that and then resolves it to `Some(false)`.
    #[serde(default)]
    pub sources_list_deb822: Option<bool>,
    #[serde(default)]
    pub seed: Option<Seed>,
    #[serde(default)]
    pub tarball: Option<Tarball>,
}

impl Default for Rootfs {
    fn default() -> Self {
        Self {
            components: default_components(),
            archive: default_archive(),
            flavor: default_archive(),
            mirror: default_mirror(),
            pocket: Pocket::default(),
            sources_list_deb822: None,
            seed: None,
            tarball: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Seed {
    pub urls: Vec<String>,
    pub names: Vec<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_true")]
    pub vcs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Tarball {
    pub url: String,
    #[serde(default)]
    pub gpg: Option<String>,
    #[serde(default)]
    pub sha256sum: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Customization {
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub pocket: Option<Pocket>,
    #[serde(default)]
    pub preseed: bool,
    #[serde(default)]
    pub cloud_init: Option<CloudInit>,
    #[serde(default)]
    pub extra_snaps: Vec<ExtraSnap>,
    #[serde(default)]
    pub extra_ppas: Vec<ExtraPpa>,
    #[serde(default)]
    pub extra_packages: Vec<ExtraPackage>,
    #[serde(default)]
    pub manual: Option<Manual>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CloudInit {
    #[serde(default)]
    pub meta_data: Option<String>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub network_config: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExtraSnap {
    pub name: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_store")]
    pub store: String,
    #[serde(default)]
    pub revision: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExtraPpa {
    pub name: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default = "default_true")]
    pub keep_enabled: bool,
}

impl ExtraPpa {
    pub fn is_private(&self) -> bool {
        self.auth.as_deref().is_some_and(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExtraPackage {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Manual {
    #[serde(default)]
    pub mkdir: Vec<MakeDir>,
    #[serde(default)]
    pub copy_file: Vec<CopyFile>,
    #[serde(default)]
    pub touch_file: Vec<TouchFile>,
    #[serde(default)]
    pub execute: Vec<Execute>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MakeDir {
    pub path: String,
    #[serde(default = "default_permissions")]
    pub permissions: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CopyFile {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TouchFile {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Execute {
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Artifacts {
    #[serde(default)]
    pub img: Vec<ImageArtifact>,
    #[serde(default)]
    pub qcow2: Vec<ImageArtifact>,
    #[serde(default)]
    pub manifest: Option<NamedArtifact>,
    #[serde(default)]
    pub filelist: Option<NamedArtifact>,
}

impl Artifacts {
    /// Key of the first requested artifact that needs a partition table.
    pub fn first_disk_key(&self) -> Option<&'static str> {
        if !self.img.is_empty() {
            Some("img")
        } else if !self.qcow2.is_empty() {
            Some("qcow2")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageArtifact {
    pub name: String,
    #[serde(default)]
    pub volume: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NamedArtifact {
    pub name: String,
}

impl BuildDefinition {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn wants_preseed(&self) -> bool {
        self.customization.as_ref().is_some_and(|c| c.preseed)
    }

    pub fn manual(&self) -> Option<&Manual> {
        self.customization.as_ref().and_then(|c| c.manual.as_ref())
    }

    pub fn extra_snaps(&self) -> &[ExtraSnap] {
        self.customization
            .as_ref()
            .map_or(&[], |c| c.extra_snaps.as_slice())
    }

    pub fn extra_packages(&self) -> Vec<String> {
        self.customization
            .as_ref()
            .map(|c| c.extra_packages.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn artifacts(&self) -> Artifacts {
        self.artifacts.clone().unwrap_or_default()
    }

    /// Fill in values that depend on whether a field was present at all.
    pub fn apply_defaults(&mut self) {
        if self.rootfs.sources_list_deb822.is_none() {
            self.rootfs.sources_list_deb822 = Some(false);
        }
    }
}

fn default_kernel() -> String {
    "linux-image-generic".to_owned()
}

fn default_components() -> Vec<String> {
    vec!["main".to_owned(), "restricted".to_owned()]
}

fn default_archive() -> String {
    "ubuntu".to_owned()
}

fn default_mirror() -> String {
    "http://archive.ubuntu.com/ubuntu/".to_owned()
}

fn default_channel() -> String {
    "stable".to_owned()
}

fn default_store() -> String {
    "canonical".to_owned()
}

fn default_permissions() -> u32 {
    0o755
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sections() {
        let def: BuildDefinition = serde_yaml::from_str(
            r"
name: ubuntu-server
architecture: amd64
series: noble
class: preinstalled
customization:
  extra-snaps:
    - name: hello
  extra-ppas:
    - name: canonical-foundations/ubuntu-image
",
        )
        .unwrap();

        assert_eq!(def.display_name(), "ubuntu-server");
        assert_eq!(def.kernel, "linux-image-generic");
        assert_eq!(def.rootfs.components, vec!["main", "restricted"]);
        assert_eq!(def.rootfs.pocket, Pocket::Release);
        assert_eq!(def.rootfs.sources_list_deb822, None);

        let snap = &def.extra_snaps()[0];
        assert_eq!(snap.channel, "stable");
        assert_eq!(snap.store, "canonical");
        assert_eq!(snap.revision, None);

        let ppa = &def.customization.as_ref().unwrap().extra_ppas[0];
        assert!(ppa.keep_enabled);
        assert!(!ppa.is_private());
    }

    #[test]
    fn apply_defaults_resolves_deb822_flag() {
        let mut def: BuildDefinition = serde_yaml::from_str(
            "name: a\narchitecture: amd64\nseries: noble\nclass: cloud\n",
        )
        .unwrap();
        def.apply_defaults();
        assert_eq!(def.rootfs.sources_list_deb822, Some(false));
    }

    #[test]
    fn first_disk_key_prefers_img() {
        let artifacts = Artifacts {
            img: vec![ImageArtifact {
                name: "a.img".to_owned(),
                volume: None,
            }],
            qcow2: vec![ImageArtifact {
                name: "a.qcow2".to_owned(),
                volume: None,
            }],
            ..Artifacts::default()
        };
        assert_eq!(artifacts.first_disk_key(), Some("img"));
        assert_eq!(Artifacts::default().first_disk_key(), None);
    }
}

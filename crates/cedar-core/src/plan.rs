use crate::classic::ClassicBuild;
use crate::machine::Step;
use crate::steps;
use cedar_runtime::BuildNeeds;
use cedar_schema::{BuildDefinition, GadgetType};

/// Where the chroot's root filesystem comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootfsSource {
    /// A tree handed to the build with `--image-path`, customized in place.
    Existing,
    /// The definition's `rootfs.tarball`, unpacked into the work directory.
    Tarball,
    /// A fresh debootstrap of `rootfs.mirror`, optionally expanded from seeds.
    Bootstrap,
}

impl RootfsSource {
    /// An existing tree wins over anything the definition describes.
    pub fn select(def: &BuildDefinition, existing: bool) -> Self {
        if existing {
            RootfsSource::Existing
        } else if def.rootfs.tarball.is_some() {
            RootfsSource::Tarball
        } else {
            RootfsSource::Bootstrap
        }
    }
}

/// Order the steps a classic build of `def` needs.
///
/// Pure: the result depends on the definition and rootfs source alone.
pub fn plan(def: &BuildDefinition, source: RootfsSource) -> Vec<Step<ClassicBuild>> {
    let artifacts = def.artifacts();
    let customization = def.customization.as_ref();
    let mut steps = Vec::new();

    if def.gadget.is_some() {
        steps.push(steps::PREPARE_GADGET_TREE);
        steps.push(steps::LOAD_GADGET_YAML);
    }
    match source {
        RootfsSource::Existing => {}
        RootfsSource::Tarball => steps.push(steps::EXTRACT_ROOTFS_TAR),
        RootfsSource::Bootstrap => {
            if def.rootfs.seed.is_some() {
                steps.push(steps::GERMINATE);
            }
            steps.push(steps::CREATE_CHROOT);
        }
    }
    if customization.is_some_and(|c| !c.extra_ppas.is_empty()) {
        steps.push(steps::ADD_EXTRA_PPAS);
    }
    steps.push(steps::PREPARE_IMAGE);
    if customization.is_some_and(|c| c.cloud_init.is_some()) {
        steps.push(steps::CUSTOMIZE_CLOUD_INIT);
    }
    if customization.is_some_and(|c| !c.components.is_empty() || c.pocket.is_some()) {
        steps.push(steps::CUSTOMIZE_SOURCES_LIST);
    }
    if def.manual().is_some() {
        steps.push(steps::CUSTOMIZE_MANUAL);
    }
    if def.wants_preseed() {
        steps.push(steps::PRESEED_IMAGE);
    }
    steps.push(steps::SET_DEFAULT_LOCALE);
    steps.push(steps::CLEAN_ROOTFS);
    if !artifacts.img.is_empty() {
        steps.push(steps::MAKE_DISK);
    }
    if !artifacts.qcow2.is_empty() {
        steps.push(steps::MAKE_QCOW2_IMAGE);
    }
    if artifacts.manifest.is_some() {
        steps.push(steps::GENERATE_PACKAGE_MANIFEST);
    }
    if artifacts.filelist.is_some() {
        steps.push(steps::GENERATE_FILELIST);
    }
    steps
}

pub fn step_names(def: &BuildDefinition, source: RootfsSource) -> Vec<&'static str> {
    plan(def, source).iter().map(|s| s.name).collect()
}

/// Host tools the steps planned for `def` will call.
pub fn host_needs(def: &BuildDefinition, source: RootfsSource) -> BuildNeeds {
    let artifacts = def.artifacts();
    let bootstrap = source == RootfsSource::Bootstrap;
    let ppas = def
        .customization
        .as_ref()
        .is_some_and(|c| !c.extra_ppas.is_empty());
    let signed_tarball = source == RootfsSource::Tarball
        && def.rootfs.tarball.as_ref().is_some_and(|t| t.gpg.is_some());
    BuildNeeds {
        git: def
            .gadget
            .as_ref()
            .is_some_and(|g| g.gadget_type == GadgetType::Git),
        bootstrap,
        germinate: bootstrap && def.rootfs.seed.is_some(),
        gpg: ppas || signed_tarball,
        preseed: def.wants_preseed(),
        disk: artifacts.first_disk_key().is_some(),
        qcow2: !artifacts.qcow2.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cedar_schema::validate_str;

    const MINIMAL: &str = "name: test\narchitecture: amd64\nseries: noble\nclass: preinstalled\n";

    const FULL: &str = "\
name: full
architecture: amd64
series: noble
class: preinstalled
gadget:
  type: git
  url: https://example.com/pc-gadget.git
rootfs:
  seed:
    urls:
      - git://git.launchpad.net/~ubuntu-core-dev/ubuntu-seeds/+git/
    names:
      - server
customization:
  preseed: true
  pocket: updates
  cloud-init:
    user-data: |
      #cloud-config
  extra-ppas:
    - name: canonical-foundations/ubuntu-image
      fingerprint: CDE5112BD4104F975FC8A53FD4C0B668FD4C9139
  manual:
    mkdir:
      - path: /opt/app
artifacts:
  img:
    - name: pc.img
  qcow2:
    - name: pc.qcow2
  manifest:
    name: pc.manifest
  filelist:
    name: pc.filelist
";

    const TARBALL: &str = "\
name: tarball
architecture: arm64
series: noble
class: cloud
rootfs:
  tarball:
    url: rootfs.tar.gz
";

    fn definition(text: &str) -> BuildDefinition {
        let (def, result) = validate_str(text).unwrap();
        assert!(result.is_valid(), "{result}");
        def.unwrap()
    }

    fn names(text: &str) -> Vec<&'static str> {
        let def = definition(text);
        step_names(&def, RootfsSource::select(&def, false))
    }

    #[test]
    fn minimal_definition_bootstraps_a_chroot() {
        assert_eq!(
            names(MINIMAL),
            ["create_chroot", "prepare_image", "set_default_locale", "clean_rootfs"]
        );
    }

    #[test]
    fn existing_tree_skips_chroot_creation() {
        let def = definition(MINIMAL);
        assert_eq!(
            step_names(&def, RootfsSource::Existing),
            ["prepare_image", "set_default_locale", "clean_rootfs"]
        );
        let def = definition(TARBALL);
        assert_eq!(RootfsSource::select(&def, true), RootfsSource::Existing);
    }

    #[test]
    fn tarball_is_extracted_instead_of_bootstrapped() {
        let def = definition(TARBALL);
        assert_eq!(RootfsSource::select(&def, false), RootfsSource::Tarball);
        assert_eq!(
            names(TARBALL),
            ["extract_rootfs_tar", "prepare_image", "set_default_locale", "clean_rootfs"]
        );
        let needs = host_needs(&def, RootfsSource::Tarball);
        assert!(!needs.bootstrap && !needs.gpg);
    }

    #[test]
    fn full_definition_plans_every_step_in_order() {
        assert_eq!(
            names(FULL),
            [
                "prepare_gadget_tree",
                "load_gadget_yaml",
                "germinate",
                "create_chroot",
                "add_extra_ppas",
                "prepare_image",
                "customize_cloud_init",
                "customize_sources_list",
                "customize_manual",
                "preseed_image",
                "set_default_locale",
                "clean_rootfs",
                "make_disk",
                "make_qcow2_image",
                "generate_package_manifest",
                "generate_filelist",
            ]
        );
    }

    #[test]
    fn planning_is_deterministic() {
        for text in [MINIMAL, FULL, TARBALL] {
            assert_eq!(names(text), names(text));
        }
    }

    #[test]
    fn preseed_only_changes_the_preseed_step() {
        let plain = names(MINIMAL);
        let mut def = definition(MINIMAL);
        def.customization.get_or_insert_with(Default::default).preseed = true;
        let seeded = step_names(&def, RootfsSource::Bootstrap);
        assert_eq!(seeded.len(), plain.len() + 1);
        assert_eq!(seeded[2], "preseed_image");
        let without: Vec<_> = seeded.iter().filter(|s| **s != "preseed_image").collect();
        assert_eq!(without, plain.iter().collect::<Vec<_>>());
    }

    #[test]
    fn host_needs_follow_definition() {
        let def = definition(MINIMAL);
        assert_eq!(host_needs(&def, RootfsSource::Existing), BuildNeeds::default());
        assert_eq!(
            host_needs(&def, RootfsSource::Bootstrap),
            BuildNeeds {
                bootstrap: true,
                ..BuildNeeds::default()
            }
        );
        let needs = host_needs(&definition(FULL), RootfsSource::Bootstrap);
        assert!(needs.git && needs.preseed && needs.disk && needs.qcow2);
        assert!(needs.bootstrap && needs.germinate && needs.gpg);
    }
}

use super::resolve_source;
use crate::classic::ClassicBuild;
use crate::CoreError;
use cedar_runtime::CommandSpec;
use cedar_schema::GadgetType;
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Put the gadget tree at `<unpack>/gadget`.
pub(crate) fn prepare_gadget_tree(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, services, machine) = build.parts()?;
    let gadget = def
        .gadget
        .as_ref()
        .ok_or_else(|| CoreError::Step("the definition declares no gadget".to_owned()))?;
    let target = machine.ctx.layout().gadget_dir();
    let url = gadget.url.as_deref().filter(|u| !u.is_empty());

    match (gadget.gadget_type, url) {
        (GadgetType::Git, Some(url)) => {
            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            let mut cmd = CommandSpec::new("git").arg("clone");
            if let Some(branch) = &gadget.branch {
                cmd = cmd.arg("--branch").arg(branch.as_str());
            }
            info!("cloning gadget tree from {url}");
            services.runner.run(&cmd.arg(url).path_arg(&target))?;
        }
        (GadgetType::Directory | GadgetType::Prebuilt, Some(url)) => {
            let source = resolve_source(url, machine.conf_def_dir());
            if !source.is_dir() {
                return Err(CoreError::Step(format!(
                    "gadget source {} is not a directory",
                    source.display()
                )));
            }
            copy_tree(&source, &target)?;
        }
        (GadgetType::Prebuilt, None) => {
            if !target.join("meta").join("gadget.yaml").exists() {
                return Err(CoreError::Step(format!(
                    "no prebuilt gadget tree found at {}",
                    target.display()
                )));
            }
            debug!("using prebuilt gadget tree at {}", target.display());
        }
        (gadget_type, None) => {
            return Err(CoreError::Step(format!(
                "a {gadget_type} gadget needs a URL"
            )));
        }
    }
    Ok(())
}

fn copy_tree(source: &Path, target: &Path) -> Result<(), CoreError> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| CoreError::Step(e.to_string()))?;
        let dest = target.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if dest.symlink_metadata().is_ok() {
                fs::remove_file(&dest)?;
            }
            std::os::unix::fs::symlink(link, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Lay out the gadget's volumes and record sizes and output names.
pub(crate) fn load_gadget_yaml(build: &mut ClassicBuild) -> Result<(), CoreError> {
    let (def, services, machine) = build.parts()?;
    let gadget_yaml = machine
        .ctx
        .layout()
        .gadget_dir()
        .join("meta")
        .join("gadget.yaml");
    let mut info = services
        .gadget
        .layout(&gadget_yaml, machine.ctx.sector_size)?;
    info.reindex();
    if info.volumes.is_empty() {
        return Err(CoreError::Step(format!(
            "{} declares no volumes",
            gadget_yaml.display()
        )));
    }

    let main = info
        .volumes
        .iter()
        .find(|v| v.has_system_data())
        .unwrap_or(&info.volumes[0])
        .name
        .clone();

    let ctx = &mut machine.ctx;
    ctx.volume_order = info.volumes.iter().map(|v| v.name.clone()).collect();
    ctx.image_sizes = info
        .volumes
        .iter()
        .map(|v| (v.name.clone(), v.min_size()))
        .collect();
    ctx.volume_names = info
        .volumes
        .iter()
        .map(|v| (v.name.clone(), format!("{}.img", v.name)))
        .collect();
    for artifact in &def.artifacts().img {
        let volume = artifact.volume.clone().unwrap_or_else(|| main.clone());
        ctx.volume_names.insert(volume, artifact.name.clone());
    }
    debug!("main volume {main}, volumes {:?}", ctx.volume_order);
    ctx.main_volume_name = Some(main);
    ctx.gadget_info = Some(info);
    Ok(())
}

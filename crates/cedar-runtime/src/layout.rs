use crate::command::{CommandRunner, CommandSpec, HostRunner};
use crate::RuntimeError;
use cedar_schema::{GadgetInfo, GadgetVolume, VolumeStructure};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const MIB: u64 = 1024 * 1024;

/// Everything needed to write one volume image.
#[derive(Debug, Clone, Copy)]
pub struct VolumeWriteRequest<'a> {
    pub volume: &'a GadgetVolume,
    pub gadget_dir: &'a Path,
    pub rootfs_dir: &'a Path,
    pub image_path: &'a Path,
    pub size: u64,
    pub sector_size: u64,
}

/// Capability that turns a gadget.yaml into a partition layout and
/// writes staged content into volume images.
pub trait GadgetLayout: Send + Sync {
    fn layout(&self, gadget_yaml: &Path, sector_size: u64) -> Result<GadgetInfo, RuntimeError>;

    fn write_volume(&self, req: &VolumeWriteRequest<'_>) -> Result<(), RuntimeError>;
}

#[derive(Debug, Deserialize)]
struct GadgetYaml {
    volumes: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
struct VolumeYaml {
    #[serde(default = "default_schema")]
    schema: String,
    #[serde(default)]
    structure: Vec<StructureYaml>,
}

#[derive(Debug, Deserialize)]
struct StructureYaml {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default, rename = "type")]
    partition_type: Option<String>,
    #[serde(default)]
    filesystem: Option<String>,
    #[serde(default)]
    offset: Option<serde_yaml::Value>,
    size: serde_yaml::Value,
    #[serde(default)]
    content: Vec<ContentYaml>,
}

#[derive(Debug, Deserialize)]
struct ContentYaml {
    #[serde(default)]
    image: Option<String>,
}

fn default_schema() -> String {
    "gpt".to_owned()
}

/// Parse a gadget size such as `440`, `4K`, `1200M` or `2G`.
pub fn parse_size(value: &serde_yaml::Value) -> Result<u64, RuntimeError> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    let text = value
        .as_str()
        .ok_or_else(|| RuntimeError::Gadget(format!("invalid size: {value:?}")))?
        .trim();
    let (digits, multiplier) = match text.chars().last() {
        Some('K') => (&text[..text.len() - 1], 1024),
        Some('M') => (&text[..text.len() - 1], MIB),
        Some('G') => (&text[..text.len() - 1], 1024 * MIB),
        _ => (text, 1),
    };
    let n = digits
        .parse::<u64>()
        .map_err(|_| RuntimeError::Gadget(format!("invalid size: {text}")))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| RuntimeError::Gadget(format!("size {text} is too large")))
}

fn align_up(value: u64, to: u64) -> Option<u64> {
    if to == 0 {
        Some(value)
    } else {
        value.div_ceil(to).checked_mul(to)
    }
}

fn overflow(volume: &str, structure: &str) -> RuntimeError {
    RuntimeError::Gadget(format!(
        "structure {structure} in volume {volume} does not fit in 64-bit offsets"
    ))
}

/// Lay out one volume: explicit offsets win, an `mbr` structure sits at zero,
/// everything else follows the previous structure starting at 1 MiB.
fn layout_volume(
    name: &str,
    raw: VolumeYaml,
    sector_size: u64,
) -> Result<GadgetVolume, RuntimeError> {
    let mut structures = Vec::with_capacity(raw.structure.len());
    let mut next = 0;

    for (index, s) in raw.structure.into_iter().enumerate() {
        let structure_name = s.name.unwrap_or_else(|| format!("{name}-{index}"));
        let size = parse_size(&s.size)?;
        if size == 0 {
            return Err(RuntimeError::Gadget(format!(
                "structure {structure_name} in volume {name} has zero size"
            )));
        }
        let offset = match (&s.offset, s.role.as_deref()) {
            (Some(v), _) => parse_size(v)?,
            (None, Some("mbr")) => 0,
            (None, _) => align_up(next.max(MIB), sector_size)
                .ok_or_else(|| overflow(name, &structure_name))?,
        };
        next = offset
            .checked_add(size)
            .ok_or_else(|| overflow(name, &structure_name))?;
        structures.push(VolumeStructure {
            name: structure_name,
            role: s.role,
            filesystem: s.filesystem,
            partition_type: s.partition_type,
            offset,
            size,
            content_image: s.content.into_iter().find_map(|c| c.image),
            index,
        });
    }

    Ok(GadgetVolume {
        name: name.to_owned(),
        schema: raw.schema,
        structures,
    })
}

/// Reads `gadget.yaml` and writes images with `parted`, `mkfs` and `dd`.
pub struct YamlGadgetLayout<R: CommandRunner = HostRunner> {
    runner: R,
}

impl YamlGadgetLayout {
    pub fn new() -> Self {
        Self { runner: HostRunner }
    }
}

impl Default for YamlGadgetLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> YamlGadgetLayout<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    fn partition(&self, req: &VolumeWriteRequest<'_>) -> Result<(), RuntimeError> {
        let image = req.image_path;
        let label = if req.volume.schema == "mbr" { "msdos" } else { "gpt" };
        self.runner.run(
            &CommandSpec::new("parted")
                .arg("-s")
                .path_arg(image)
                .args(["mklabel", label]),
        )?;

        for s in &req.volume.structures {
            if s.role.as_deref() == Some("mbr") || s.partition_type.as_deref() == Some("bare") {
                continue;
            }
            let kind = if label == "gpt" { s.name.as_str() } else { "primary" };
            let last = s
                .offset
                .checked_add(s.size)
                .and_then(|end| end.checked_sub(1))
                .ok_or_else(|| {
                    RuntimeError::Gadget(format!("structure {} has an invalid extent", s.name))
                })?;
            self.runner.run(
                &CommandSpec::new("parted")
                    .arg("-s")
                    .path_arg(image)
                    .args(["unit", "B", "mkpart", kind])
                    .arg(format!("{}B", s.offset))
                    .arg(format!("{last}B")),
            )?;
        }
        Ok(())
    }

    fn fill(&self, req: &VolumeWriteRequest<'_>, s: &VolumeStructure) -> Result<(), RuntimeError> {
        let image = req.image_path;
        match (s.filesystem.as_deref(), &s.content_image) {
            (Some("ext4"), _) => {
                let content = if s.is_system_data() {
                    req.rootfs_dir.to_path_buf()
                } else {
                    req.gadget_dir.join(&s.name)
                };
                let mut cmd = CommandSpec::new("mkfs.ext4").args(["-F", "-L"]).arg(s.name.as_str());
                if content.is_dir() {
                    cmd = cmd.arg("-d").path_arg(&content);
                }
                cmd = cmd
                    .arg("-E")
                    .arg(format!("offset={}", s.offset))
                    .path_arg(image)
                    .arg(format!("{}k", s.size / 1024));
                self.runner.run(&cmd)?;
            }
            (Some("vfat"), _) => {
                self.runner.run(
                    &CommandSpec::new("mkfs.vfat")
                        .arg(format!("--offset={}", s.offset / req.sector_size))
                        .args(["-n", s.name.as_str()])
                        .path_arg(image)
                        .arg((s.size / 1024).to_string()),
                )?;
            }
            (Some(other), _) => {
                return Err(RuntimeError::Gadget(format!(
                    "unsupported filesystem {other} for structure {}",
                    s.name
                )));
            }
            (None, Some(content)) => {
                self.runner.run(
                    &CommandSpec::new("dd")
                        .arg(format!("if={}", req.gadget_dir.join(content).display()))
                        .arg(format!("of={}", image.display()))
                        .arg(format!("bs={}", req.sector_size))
                        .arg(format!("seek={}", s.offset / req.sector_size))
                        .arg("conv=notrunc"),
                )?;
            }
            (None, None) => {}
        }
        Ok(())
    }
}

impl<R: CommandRunner> GadgetLayout for YamlGadgetLayout<R> {
    fn layout(&self, gadget_yaml: &Path, sector_size: u64) -> Result<GadgetInfo, RuntimeError> {
        let raw: GadgetYaml = serde_yaml::from_str(&fs::read_to_string(gadget_yaml)?)?;
        let mut volumes = Vec::with_capacity(raw.volumes.len());
        for (key, value) in raw.volumes {
            let name = key
                .as_str()
                .ok_or_else(|| RuntimeError::Gadget("volume names must be strings".to_owned()))?
                .to_owned();
            let volume: VolumeYaml = serde_yaml::from_value(value)?;
            volumes.push(layout_volume(&name, volume, sector_size)?);
        }
        if volumes.is_empty() {
            return Err(RuntimeError::Gadget(format!(
                "no volumes defined in {}",
                gadget_yaml.display()
            )));
        }
        debug!("gadget declares {} volumes", volumes.len());
        Ok(GadgetInfo { volumes })
    }

    fn write_volume(&self, req: &VolumeWriteRequest<'_>) -> Result<(), RuntimeError> {
        info!(
            "writing volume {} to {}",
            req.volume.name,
            req.image_path.display()
        );
        let file = fs::File::create(req.image_path)?;
        file.set_len(req.size)?;
        drop(file);

        self.partition(req)?;
        for s in &req.volume.structures {
            self.fill(req, s)?;
        }
        Ok(())
    }
}

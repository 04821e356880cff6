use serde::{Deserialize, Serialize};

/// Computed partition layout for every volume a gadget declares.
///
/// Volumes and structures are kept as ordered sequences so that their order
/// survives serialization. `VolumeStructure::index` is not serialized and
/// must be rebuilt with [`GadgetInfo::reindex`] after decoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GadgetInfo {
    pub volumes: Vec<GadgetVolume>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GadgetVolume {
    pub name: String,
    /// Partition table schema, `gpt` or `mbr`.
    pub schema: String,
    pub structures: Vec<VolumeStructure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeStructure {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub filesystem: Option<String>,
    /// Partition type code passed to the partitioning tool.
    #[serde(default)]
    pub partition_type: Option<String>,
    /// Byte offset from the start of the volume.
    pub offset: u64,
    pub size: u64,
    /// Raw image to copy into the structure, relative to the gadget tree.
    #[serde(default)]
    pub content_image: Option<String>,
    /// Position in the volume's structure list.
    #[serde(skip)]
    pub index: usize,
}

pub const SYSTEM_DATA_ROLE: &str = "system-data";

impl VolumeStructure {
    pub fn is_system_data(&self) -> bool {
        self.role.as_deref() == Some(SYSTEM_DATA_ROLE)
    }
}

impl GadgetVolume {
    /// Bytes needed to hold every structure in this volume.
    pub fn min_size(&self) -> u64 {
        self.structures
            .iter()
            .map(|s| s.offset.saturating_add(s.size))
            .max()
            .unwrap_or(0)
    }

    pub fn has_system_data(&self) -> bool {
        self.structures.iter().any(VolumeStructure::is_system_data)
    }
}

impl GadgetInfo {
    /// Recompute each structure's positional `index` from list order.
    pub fn reindex(&mut self) {
        for volume in &mut self.volumes {
            for (i, structure) in volume.structures.iter_mut().enumerate() {
                structure.index = i;
            }
        }
    }

    pub fn volume(&self, name: &str) -> Option<&GadgetVolume> {
        self.volumes.iter().find(|v| v.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure(name: &str, offset: u64, size: u64) -> VolumeStructure {
        VolumeStructure {
            name: name.to_owned(),
            role: None,
            filesystem: None,
            partition_type: None,
            offset,
            size,
            content_image: None,
            index: 99,
        }
    }

    #[test]
    fn index_is_rebuilt_from_order_after_decode() {
        let mut info = GadgetInfo {
            volumes: vec![GadgetVolume {
                name: "pc".to_owned(),
                schema: "gpt".to_owned(),
                structures: vec![structure("bios", 0, 1), structure("efi", 1, 2)],
            }],
        };
        info.reindex();
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("\"index\""));

        let mut back: GadgetInfo = serde_json::from_str(&json).unwrap();
        assert!(back.volumes[0].structures.iter().all(|s| s.index == 0));
        back.reindex();
        assert_eq!(back, info);
        assert_eq!(back.volumes[0].structures[1].index, 1);
    }

    #[test]
    fn min_size_covers_last_structure() {
        let volume = GadgetVolume {
            name: "pc".to_owned(),
            schema: "gpt".to_owned(),
            structures: vec![structure("a", 1024, 2048), structure("b", 4096, 512)],
        };
        assert_eq!(volume.min_size(), 4608);
        assert!(!volume.has_system_data());
    }

    #[test]
    fn min_size_saturates_instead_of_overflowing() {
        let volume = GadgetVolume {
            name: "pc".to_owned(),
            schema: "gpt".to_owned(),
            structures: vec![structure("far", u64::MAX, 1)],
        };
        assert_eq!(volume.min_size(), u64::MAX);
    }
}

use std::collections::BTreeMap;

/// Current schema version of [`WorldgenSave`].
///
/// v1: baseline extension map.
/// v2: region decisions carry a `task_failures` counter.
pub const CURRENT_SAVE_VERSION: u32 = 2;

/// Everything the engine persists, as one encodable snapshot.
///
/// The engine's tables are opaque here: each `Saveable` resource encodes its
/// own bytes under its `SAVE_KEY`. A new persisted table only needs to be
/// registered; the file layout does not change.
#[derive(bitcode::Encode, bitcode::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldgenSave {
    pub version: u32,
    pub extensions: BTreeMap<String, Vec<u8>>,
}

impl WorldgenSave {
    pub fn new(extensions: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            version: CURRENT_SAVE_VERSION,
            extensions,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bitcode::Error> {
        bitcode::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_save_is_current_version() {
        let save = WorldgenSave::new(BTreeMap::new());
        assert_eq!(save.version, CURRENT_SAVE_VERSION);
        assert!(save.extensions.is_empty());
    }

    #[test]
    fn test_encode_decode_keeps_extensions() {
        let mut extensions = BTreeMap::new();
        extensions.insert("footprints".to_string(), vec![1, 2, 3]);
        extensions.insert("tick_counter".to_string(), vec![9]);
        let save = WorldgenSave::new(extensions);

        let decoded = WorldgenSave::decode(&save.encode()).expect("decodes");
        assert_eq!(decoded, save);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(WorldgenSave::decode(&[0xFF, 0x00, 0x13]).is_err());
    }
}

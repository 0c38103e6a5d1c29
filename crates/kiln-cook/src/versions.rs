use kiln_core::FileType;

/// Version of the cooker as a whole. Bumping it invalidates every cooked file.
pub const COOKER_VERSION: u32 = 39;

/// Per-type data versions, indexed by [`FileType::index`].
///
/// These track cook-relevant changes for a single type and are unrelated to any version stored
/// inside the cooked formats themselves.
pub const DATA_VERSIONS: [u32; FileType::COUNT] = [
    1,  // Unknown
    10, // Animation2D
    1,  // Csv
    1,  // Effect
    1,  // EffectHeader
    1,  // Exe
    7,  // Font
    3,  // FxBank
    1,  // Html
    1,  // Json
    1,  // PemCertificate
    1,  // Protobuf
    1,  // SaveGame
    2,  // SceneAsset
    2,  // ScenePrefab
    7,  // Script
    13, // SoundBank
    13, // SoundProject
    3,  // Texture0
    1,  // Texture1
    1,  // Texture2
    1,  // Texture3
    1,  // Texture4
    1,  // Text
    9,  // UiMovie
    1,  // Wav
    1,  // Xml
    7,  // ScriptProject
    1,  // Cs
    1,  // Video
];

/// `true` when exactly one source file produces exactly one cooked file.
///
/// Such outputs carry no metadata document: staleness is a timestamp comparison, and format
/// changes are handled in bulk by [`crate::VersionGate`]. The remaining types depend on many
/// inputs:
/// - effects flatten their whole include graph into their metadata,
/// - script projects depend on many `.cs` files,
/// - sound projects stand in for a directory of banks (their siblings),
/// - UI movies depend on the `.png` files extracted from them.
pub fn is_one_to_one(file_type: FileType) -> bool {
    !matches!(
        file_type,
        FileType::Effect | FileType::ScriptProject | FileType::SoundProject | FileType::UiMovie
    )
}

/// Cooker and data versions the process checks persisted state against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookVersions {
    cooker: u32,
    data: [u32; FileType::COUNT],
}

impl Default for CookVersions {
    fn default() -> Self {
        Self::current()
    }
}

impl CookVersions {
    /// Versions compiled into this build.
    pub fn current() -> Self {
        Self {
            cooker: COOKER_VERSION,
            data: DATA_VERSIONS,
        }
    }

    pub fn cooker_version(&self) -> u32 {
        self.cooker
    }

    pub fn data_version(&self, file_type: FileType) -> u32 {
        self.data[file_type.index()]
    }

    pub fn with_cooker_version(mut self, cooker: u32) -> Self {
        self.cooker = cooker;
        self
    }

    pub fn with_data_version(mut self, file_type: FileType, version: u32) -> Self {
        self.data[file_type.index()] = version;
        self
    }
}

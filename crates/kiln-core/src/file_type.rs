use std::fmt;

/// Asset type of a [`crate::FilePath`].
///
/// The discriminant order is persisted (the version table stores one slot per type in index
/// order), so new variants must only ever be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum FileType {
    #[default]
    Unknown,
    Animation2D,
    Csv,
    Effect,
    EffectHeader,
    Exe,
    Font,
    FxBank,
    Html,
    Json,
    PemCertificate,
    Protobuf,
    SaveGame,
    SceneAsset,
    ScenePrefab,
    Script,
    SoundBank,
    SoundProject,
    Texture0,
    Texture1,
    Texture2,
    Texture3,
    Texture4,
    Text,
    UiMovie,
    Wav,
    Xml,
    ScriptProject,
    Cs,
    Video,
}

/// `(type, cooked extension, source extension)` in index order.
const TABLE: [(FileType, &str, &str); FileType::COUNT] = [
    (FileType::Unknown, "", ""),
    (FileType::Animation2D, ".saf", ".son"),
    (FileType::Csv, ".csv", ".csv"),
    (FileType::Effect, ".fxc", ".fx"),
    (FileType::EffectHeader, ".fxh_marker", ".fxh"),
    (FileType::Exe, ".exe", ".exe"),
    (FileType::Font, ".sff", ".ttf"),
    (FileType::FxBank, ".fxb", ".xfx"),
    (FileType::Html, ".html", ".html"),
    (FileType::Json, ".json", ".json"),
    (FileType::PemCertificate, ".pem", ".pem"),
    (FileType::Protobuf, ".pb", ".proto"),
    (FileType::SaveGame, ".dat", ".dat"),
    (FileType::SceneAsset, ".ssa", ".fbx"),
    (FileType::ScenePrefab, ".spf", ".prefab"),
    (FileType::Script, ".lbc", ".lua"),
    (FileType::SoundBank, ".bank", ".bank"),
    (FileType::SoundProject, ".fev", ".fspro"),
    (FileType::Texture0, ".sif0", ".png"),
    (FileType::Texture1, ".sif1", ".png"),
    (FileType::Texture2, ".sif2", ".png"),
    (FileType::Texture3, ".sif3", ".png"),
    (FileType::Texture4, ".sif4", ".png"),
    (FileType::Text, ".txt", ".txt"),
    (FileType::UiMovie, ".fcn", ".swf"),
    (FileType::Wav, ".wav", ".wav"),
    (FileType::Xml, ".xml", ".xml"),
    (FileType::ScriptProject, ".csp", ".csproj"),
    (FileType::Cs, ".cs", ".cs"),
    (FileType::Video, ".avi", ".avi"),
];

impl FileType {
    pub const COUNT: usize = 30;

    /// Every texture variant, in index order.
    pub const TEXTURES: [FileType; 5] = [
        FileType::Texture0,
        FileType::Texture1,
        FileType::Texture2,
        FileType::Texture3,
        FileType::Texture4,
    ];

    /// Iterates all types in index order.
    pub fn all() -> impl Iterator<Item = FileType> {
        TABLE.iter().map(|(ty, _, _)| *ty)
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<FileType> {
        TABLE.get(index).map(|(ty, _, _)| *ty)
    }

    /// Extension (including the leading dot) of the cooked artifact.
    pub fn cooked_extension(self) -> &'static str {
        TABLE[self.index()].1
    }

    /// Extension (including the leading dot) of the authored source file.
    pub fn source_extension(self) -> &'static str {
        TABLE[self.index()].2
    }

    /// Maps a file extension to its type.
    ///
    /// Both cooked and source extensions are recognized, case-insensitively and with or without
    /// the leading dot. Unrecognized extensions map to [`FileType::Unknown`].
    pub fn from_extension(extension: &str) -> FileType {
        let extension = extension.strip_prefix('.').unwrap_or(extension);
        if extension.is_empty() {
            return FileType::Unknown;
        }
        let lower = extension.to_ascii_lowercase();
        match lower.as_str() {
            // Legacy sound extensions.
            "fdp" => return FileType::SoundProject,
            "fsb" => return FileType::SoundBank,
            // Shared by every texture variant; the first one is canonical.
            "png" => return FileType::Texture0,
            _ => {}
        }
        TABLE
            .iter()
            .find(|(_, cooked, source)| {
                cooked.strip_prefix('.') == Some(lower.as_str())
                    || source.strip_prefix('.') == Some(lower.as_str())
            })
            .map(|(ty, _, _)| *ty)
            .unwrap_or(FileType::Unknown)
    }

    #[inline]
    pub fn is_texture(self) -> bool {
        matches!(
            self,
            FileType::Texture0
                | FileType::Texture1
                | FileType::Texture2
                | FileType::Texture3
                | FileType::Texture4
        )
    }

    /// Collapses texture variants onto [`FileType::Texture0`]; every other type maps to itself.
    #[inline]
    pub fn canonical(self) -> FileType {
        if self.is_texture() {
            FileType::Texture0
        } else {
            self
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FileType::Unknown => "Unknown",
            FileType::Animation2D => "Animation2D",
            FileType::Csv => "Csv",
            FileType::Effect => "Effect",
            FileType::EffectHeader => "EffectHeader",
            FileType::Exe => "Exe",
            FileType::Font => "Font",
            FileType::FxBank => "FxBank",
            FileType::Html => "Html",
            FileType::Json => "Json",
            FileType::PemCertificate => "PemCertificate",
            FileType::Protobuf => "Protobuf",
            FileType::SaveGame => "SaveGame",
            FileType::SceneAsset => "SceneAsset",
            FileType::ScenePrefab => "ScenePrefab",
            FileType::Script => "Script",
            FileType::SoundBank => "SoundBank",
            FileType::SoundProject => "SoundProject",
            FileType::Texture0 => "Texture0",
            FileType::Texture1 => "Texture1",
            FileType::Texture2 => "Texture2",
            FileType::Texture3 => "Texture3",
            FileType::Texture4 => "Texture4",
            FileType::Text => "Text",
            FileType::UiMovie => "UiMovie",
            FileType::Wav => "Wav",
            FileType::Xml => "Xml",
            FileType::ScriptProject => "ScriptProject",
            FileType::Cs => "Cs",
            FileType::Video => "Video",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

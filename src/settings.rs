//! Video/audio settings and their validation

use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Encoder geometry and bitrates
///
/// Dimensions are stored for portrait; see [`VideoOrientation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    /// Video bitrate, bits/sec
    pub bitrate: u32,
    /// Audio bitrate, bits/sec
    pub audio_bitrate: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
            bitrate: 3_000_000,
            audio_bitrate: 192_000,
        }
    }
}

/// Partial settings change. Unset fields take the default value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoSettingsUpdate {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate: Option<u32>,
    pub audio_bitrate: Option<u32>,
}

impl VideoSettingsUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn audio_bitrate(mut self, bitrate: u32) -> Self {
        self.audio_bitrate = Some(bitrate);
        self
    }

    /// Merge with [`VideoSettings::default`]
    pub fn resolve(&self) -> VideoSettings {
        let d = VideoSettings::default();
        VideoSettings {
            width: self.width.unwrap_or(d.width),
            height: self.height.unwrap_or(d.height),
            bitrate: self.bitrate.unwrap_or(d.bitrate),
            audio_bitrate: self.audio_bitrate.unwrap_or(d.audio_bitrate),
        }
    }
}

/// Ranges the encoders accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsLimits {
    pub width: RangeInclusive<u32>,
    pub height: RangeInclusive<u32>,
    pub bitrate: RangeInclusive<u32>,
    pub audio_bitrate: RangeInclusive<u32>,
}

impl Default for SettingsLimits {
    fn default() -> Self {
        Self {
            width: 128..=3840,
            height: 128..=3840,
            bitrate: 100_000..=50_000_000,
            audio_bitrate: 32_000..=320_000,
        }
    }
}

impl SettingsLimits {
    pub fn validate(&self, s: &VideoSettings) -> Result<()> {
        check_dimension("width", s.width, &self.width)?;
        check_dimension("height", s.height, &self.height)?;
        check_range("bitrate", s.bitrate, &self.bitrate)?;
        check_range("audio bitrate", s.audio_bitrate, &self.audio_bitrate)?;
        Ok(())
    }
}

fn check_dimension(name: &str, value: u32, range: &RangeInclusive<u32>) -> Result<()> {
    check_range(name, value, range)?;
    if value % 2 != 0 {
        return Err(Error::InvalidSettings(format!("{} {} must be even", name, value)));
    }
    Ok(())
}

fn check_range(name: &str, value: u32, range: &RangeInclusive<u32>) -> Result<()> {
    if value == 0 || !range.contains(&value) {
        return Err(Error::InvalidSettings(format!(
            "{} {} outside {}..={}",
            name,
            value,
            range.start(),
            range.end()
        )));
    }
    Ok(())
}

/// Audio capture route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum AudioInputType {
    Bluetooth,
    #[default]
    BuiltInMic,
    Headset,
}

impl AudioInputType {
    pub const ALL: [AudioInputType; 3] = [
        AudioInputType::Bluetooth,
        AudioInputType::BuiltInMic,
        AudioInputType::Headset,
    ];

    /// Stable tag used across the bridge
    pub fn tag(&self) -> &'static str {
        match self {
            AudioInputType::Bluetooth => "bluetooth",
            AudioInputType::BuiltInMic => "built_in_mic",
            AudioInputType::Headset => "headset",
        }
    }

    /// Positional index used by older bridge clients (0 bluetooth, 1 mic, 2 headset)
    pub fn from_legacy_ordinal(ordinal: u32) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }
}

impl fmt::Display for AudioInputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for AudioInputType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bluetooth" => Ok(AudioInputType::Bluetooth),
            "built_in_mic" | "builtinmic" | "speaker" => Ok(AudioInputType::BuiltInMic),
            "headset" => Ok(AudioInputType::Headset),
            other => Err(Error::InvalidSettings(format!("unknown audio input {:?}", other))),
        }
    }
}

/// Capture orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum VideoOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl VideoOrientation {
    pub const ALL: [VideoOrientation; 4] = [
        VideoOrientation::Portrait,
        VideoOrientation::PortraitUpsideDown,
        VideoOrientation::LandscapeLeft,
        VideoOrientation::LandscapeRight,
    ];

    pub fn is_landscape(&self) -> bool {
        matches!(
            self,
            VideoOrientation::LandscapeLeft | VideoOrientation::LandscapeRight
        )
    }
}

/// Current settings, owned by the control loop
#[derive(Debug, Clone)]
pub struct SettingsStore {
    video: VideoSettings,
    audio_input: AudioInputType,
    orientation: VideoOrientation,
    allowed: BTreeSet<VideoOrientation>,
    limits: SettingsLimits,
}

impl SettingsStore {
    pub fn new(limits: SettingsLimits) -> Self {
        Self {
            video: VideoSettings::default(),
            audio_input: AudioInputType::default(),
            orientation: VideoOrientation::default(),
            allowed: VideoOrientation::ALL.into_iter().collect(),
            limits,
        }
    }

    pub fn video(&self) -> VideoSettings {
        self.video
    }

    pub fn audio_input(&self) -> AudioInputType {
        self.audio_input
    }

    pub fn orientation(&self) -> VideoOrientation {
        self.orientation
    }

    pub fn limits(&self) -> &SettingsLimits {
        &self.limits
    }

    /// Merge `update` with defaults and validate, without applying it
    pub fn prepare(&self, update: &VideoSettingsUpdate) -> Result<VideoSettings> {
        let settings = update.resolve();
        self.limits.validate(&settings)?;
        Ok(settings)
    }

    /// Apply settings that passed [`SettingsStore::prepare`]
    pub fn commit(&mut self, settings: VideoSettings) {
        self.video = settings;
    }

    pub fn set_audio_input(&mut self, input: AudioInputType) {
        self.audio_input = input;
    }

    pub fn set_allowed_orientations(
        &mut self,
        allowed: impl IntoIterator<Item = VideoOrientation>,
    ) {
        self.allowed = allowed.into_iter().collect();
    }

    /// Whether switching to `orientation` would change anything
    pub fn accepts_orientation(&self, orientation: VideoOrientation) -> bool {
        orientation != self.orientation && self.allowed.contains(&orientation)
    }

    pub fn set_orientation(&mut self, orientation: VideoOrientation) {
        self.orientation = orientation;
    }

    /// Encoder geometry for `settings` under `orientation`
    pub fn geometry_for(settings: &VideoSettings, orientation: VideoOrientation) -> (u32, u32) {
        if orientation.is_landscape() {
            (settings.height, settings.width)
        } else {
            (settings.width, settings.height)
        }
    }

    /// Encoder geometry for the current settings
    pub fn geometry(&self) -> (u32, u32) {
        Self::geometry_for(&self.video, self.orientation)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(SettingsLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_partial_update_merges_with_defaults() {
        let s = VideoSettingsUpdate::new().bitrate(2_000_000).resolve();
        assert_eq!(s.width, 720);
        assert_eq!(s.height, 1280);
        assert_eq!(s.bitrate, 2_000_000);
        assert_eq!(s.audio_bitrate, 192_000);
    }

    #[test]
    fn test_prepare_does_not_apply() {
        let store = SettingsStore::default();
        let s = store
            .prepare(&VideoSettingsUpdate::new().size(1280, 720).bitrate(2_000_000))
            .unwrap();
        assert_eq!((s.width, s.height), (1280, 720));
        assert_eq!(store.video(), VideoSettings::default());
    }

    #[test]
    fn test_validation_failures() {
        let store = SettingsStore::default();
        for update in [
            VideoSettingsUpdate::new().size(721, 1280),
            VideoSettingsUpdate::new().size(0, 1280),
            VideoSettingsUpdate::new().size(720, 8000),
            VideoSettingsUpdate::new().bitrate(0),
            VideoSettingsUpdate::new().bitrate(60_000_000),
            VideoSettingsUpdate::new().audio_bitrate(1000),
        ] {
            let err = store.prepare(&update).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidSettings, "{:?}", update);
        }
    }

    #[test]
    fn test_custom_limits() {
        let limits = SettingsLimits {
            width: 128..=1920,
            height: 128..=1920,
            ..Default::default()
        };
        let store = SettingsStore::new(limits);
        assert!(store.prepare(&VideoSettingsUpdate::new().size(2560, 1440)).is_err());
        assert!(store.prepare(&VideoSettingsUpdate::new().size(1920, 1080)).is_ok());
    }

    #[test]
    fn test_audio_input_tags() {
        for input in AudioInputType::ALL {
            assert_eq!(input.tag().parse::<AudioInputType>().unwrap(), input);
        }
        assert_eq!(
            "Speaker".parse::<AudioInputType>().unwrap(),
            AudioInputType::BuiltInMic
        );
        assert!("usb".parse::<AudioInputType>().is_err());
    }

    #[test]
    fn test_audio_input_legacy_ordinal() {
        assert_eq!(
            AudioInputType::from_legacy_ordinal(0),
            Some(AudioInputType::Bluetooth)
        );
        assert_eq!(
            AudioInputType::from_legacy_ordinal(2),
            Some(AudioInputType::Headset)
        );
        assert_eq!(AudioInputType::from_legacy_ordinal(3), None);
    }

    #[test]
    fn test_orientation_geometry() {
        let mut store = SettingsStore::default();
        assert_eq!(store.geometry(), (720, 1280));

        assert!(store.accepts_orientation(VideoOrientation::LandscapeLeft));
        store.set_orientation(VideoOrientation::LandscapeLeft);
        assert_eq!(store.geometry(), (1280, 720));
        assert!(!store.accepts_orientation(VideoOrientation::LandscapeLeft));

        store.set_allowed_orientations([VideoOrientation::LandscapeLeft]);
        assert!(!store.accepts_orientation(VideoOrientation::Portrait));
    }
}

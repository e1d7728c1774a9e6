use crate::error::{EiscpError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Independently controllable output path on a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Main,
    Zone2,
    Zone3,
    Zone4,
}

impl Zone {
    pub const ALL: [Zone; 4] = [Zone::Main, Zone::Zone2, Zone::Zone3, Zone::Zone4];

    /// Identifier used in configuration and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Zone::Main => "main",
            Zone::Zone2 => "zone2",
            Zone::Zone3 => "zone3",
            Zone::Zone4 => "zone4",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Zone {
    type Err = EiscpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "main" => Ok(Zone::Main),
            "zone2" => Ok(Zone::Zone2),
            "zone3" => Ok(Zone::Zone3),
            "zone4" => Ok(Zone::Zone4),
            other => Err(EiscpError::InvalidConfig(format!("unknown zone {other}"))),
        }
    }
}

/// Power state of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    On,
    Standby,
}

/// Hardware address, the durable identity of a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = EiscpError;

    /// Accepts `0009B0D00BD5` as well as colon or dash separated forms.
    /// Longer identifiers are truncated to their first twelve hex digits.
    fn from_str(s: &str) -> Result<Self> {
        let hex: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        if hex.len() < 12 || !hex.is_ascii() {
            return Err(EiscpError::InvalidResponse(format!("invalid MAC address {s:?}")));
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| EiscpError::InvalidResponse(format!("invalid MAC address {s:?}")))?;
        }
        Ok(MacAddress(bytes))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity of a receiver found on the network
///
/// Immutable once created. The MAC address is the stable key; the host may
/// change when the receiver gets a new DHCP lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub model: String,
    pub mac: MacAddress,
    pub host: String,
    pub port: u16,

    /// Destination area code (e.g. "DX", "XX")
    #[serde(default)]
    pub region: String,

    pub zones: Vec<Zone>,

    /// Version byte from the discovery reply header
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
}

fn default_protocol_version() -> u8 {
    crate::frame::PROTOCOL_VERSION
}

impl DeviceIdentity {
    /// Whether this receiver has the given zone
    pub fn supports(&self, zone: Zone) -> bool {
        self.zones.contains(&zone)
    }

    /// Connect to this receiver and return the client
    ///
    /// # Example
    ///
    /// ```no_run
    /// use onkyo_eiscp::{ClientConfig, Discovery};
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let devices = Discovery::default().discover_all(Duration::from_secs(3)).await?;
    ///     if let Some(identity) = devices.first() {
    ///         let client = identity.connect(ClientConfig::default()).await?;
    ///         client.main().power_on().await?;
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(&self, config: crate::config::ClientConfig) -> Result<crate::client::EiscpClient> {
        crate::client::EiscpClient::connect(self.clone(), config).await
    }
}

/// Number of volume steps the receiver uses for its full range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VolumeResolution(u16);

impl VolumeResolution {
    pub const ALLOWED: [u16; 4] = [50, 80, 100, 200];

    pub fn steps(self) -> u16 {
        self.0
    }
}

impl Default for VolumeResolution {
    fn default() -> Self {
        VolumeResolution(50)
    }
}

impl TryFrom<u16> for VolumeResolution {
    type Error = EiscpError;

    fn try_from(value: u16) -> Result<Self> {
        if Self::ALLOWED.contains(&value) {
            Ok(VolumeResolution(value))
        } else {
            Err(EiscpError::InvalidConfig(format!(
                "volume resolution must be one of {:?}, got {value}",
                Self::ALLOWED
            )))
        }
    }
}

impl From<VolumeResolution> for u16 {
    fn from(value: VolumeResolution) -> Self {
        value.0
    }
}

/// Declares an enum over a two-character receiver code space.
///
/// Unknown codes are preserved in `Other` so reports from newer firmware
/// still round-trip.
macro_rules! code_table {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident = $code:literal => $meaning:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant,)*
            /// Code not in the known table
            Other(String),
        }

        impl $name {
            /// Every known entry
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            /// Look up a code as sent by the receiver
            pub fn from_code(code: &str) -> Self {
                match code.to_ascii_uppercase().as_str() {
                    $($code => $name::$variant,)*
                    other => $name::Other(other.to_string()),
                }
            }

            /// Look up an entry by its display meaning
            pub fn from_meaning(meaning: &str) -> Option<Self> {
                Self::ALL.iter().find(|v| v.meaning() == meaning).cloned()
            }

            /// Wire code
            pub fn code(&self) -> &str {
                match self {
                    $($name::$variant => $code,)*
                    $name::Other(code) => code,
                }
            }

            /// Human readable name as printed on the receiver
            pub fn meaning(&self) -> &str {
                match self {
                    $($name::$variant => $meaning,)*
                    $name::Other(code) => code,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.meaning())
            }
        }
    };
}

code_table! {
    /// Input selector
    InputSource {
        Dvr = "00" => "VIDEO1 ··· VCR/DVR ··· STB/DVR",
        Cbl = "01" => "VIDEO2 ··· CBL/SAT",
        Game = "02" => "VIDEO3 ··· GAME/TV ··· GAME",
        Aux = "03" => "VIDEO4 ··· AUX",
        Game2 = "04" => "VIDEO5 ··· AUX2 ··· GAME2",
        Pc = "05" => "VIDEO6 ··· PC",
        Video7 = "06" => "VIDEO7",
        Extra1 = "07" => "HIDDEN1 ··· EXTRA1",
        Extra2 = "08" => "HIDDEN2 ··· EXTRA2",
        Extra3 = "09" => "HIDDEN3 ··· EXTRA3",
        Dvd = "10" => "DVD ··· BD/DVD",
        StrmBox = "11" => "STRM BOX",
        Tv = "12" => "TV",
        Tape = "20" => "TAPE ··· TV/TAPE",
        Tape2 = "21" => "TAPE2",
        Phono = "22" => "PHONO",
        Cd = "23" => "CD ··· TV/CD",
        Fm = "24" => "FM",
        Am = "25" => "AM",
        Tuner = "26" => "TUNER",
        MusicServer = "27" => "MUSIC SERVER ··· P4S ··· DLNA",
        InternetRadio = "28" => "INTERNET RADIO ··· IRADIO FAVORITE",
        Usb = "29" => "USB ··· USB(FRONT)",
        UsbRear = "2A" => "USB(REAR)",
        Network = "2B" => "NETWORK ··· NET",
        Airplay = "2D" => "AIRPLAY",
        Bluetooth = "2E" => "BLUETOOTH",
        UsbDacIn = "2F" => "USB DAC IN",
        MultiCh = "30" => "MULTI CH",
        Xm = "31" => "XM",
        Sirius = "32" => "SIRIUS",
        Dab = "33" => "DAB",
        UniversalPort = "40" => "UNIVERSAL PORT",
        Line = "41" => "LINE",
        Line2 = "42" => "LINE2",
        Optical = "44" => "OPTICAL",
        Coaxial = "45" => "COAXIAL",
        Hdmi5 = "55" => "HDMI 5",
        Hdmi6 = "56" => "HDMI 6",
        Hdmi7 = "57" => "HDMI 7",
        MainSource = "80" => "MAIN SOURCE",
    }
}

code_table! {
    /// Listening (surround) mode, main zone only
    ListeningMode {
        Stereo = "00" => "STEREO",
        Direct = "01" => "DIRECT",
        Surround = "02" => "SURROUND",
        Film = "03" => "FILM",
        Thx = "04" => "THX",
        Action = "05" => "ACTION",
        Musical = "06" => "MUSICAL",
        MonoMovie = "07" => "MONO MOVIE",
        Orchestra = "08" => "ORCHESTRA",
        Unplugged = "09" => "UNPLUGGED",
        StudioMix = "0A" => "STUDIO-MIX",
        TvLogic = "0B" => "TV LOGIC",
        AllChStereo = "0C" => "ALL CH STEREO",
        TheaterDimensional = "0D" => "THEATER-DIMENSIONAL",
        Enhanced = "0E" => "ENHANCED 7/ENHANCE",
        Mono = "0F" => "MONO",
        PureAudio = "11" => "PURE AUDIO",
        Multiplex = "12" => "MULTIPLEX",
        FullMono = "13" => "FULL MONO",
        DolbyVirtual = "14" => "DOLBY VIRTUAL",
        DtsSurroundSensation = "15" => "DTS Surround Sensation",
        AudysseyDsx = "16" => "Audyssey DSX",
        WholeHouse = "1F" => "Whole House Mode",
        Stage = "23" => "Stage",
        GameAction = "25" => "Action",
        Music = "26" => "Music",
        Sports = "2E" => "Sports",
        StraightDecode = "40" => "Straight Decode",
        DolbyExDtsEs = "41" => "Dolby EX/DTS ES",
        ThxCinema = "42" => "THX Cinema",
        ThxSurroundEx = "43" => "THX Surround EX",
        ThxMusic = "44" => "THX Music",
        ThxGames = "45" => "THX Games",
        ThxU2Cinema = "50" => "THX U2/S2 Cinema/Cinema2",
        ThxU2Music = "51" => "THX U2/S2 Music/Music2",
        ThxU2Games = "52" => "THX U2/S2 Games",
        PliiMovie = "80" => "PLII/PLIIx Movie",
        PliiMusic = "81" => "PLII/PLIIx Music",
        Neo6Cinema = "82" => "Neo:6 Cinema",
        Neo6Music = "83" => "Neo:6 Music",
        PliiThxCinema = "84" => "PLII/PLIIx THX Cinema",
        Neo6ThxCinema = "85" => "Neo:6 THX Cinema",
        PliiGame = "86" => "PLII/PLIIx Game",
        NeuralSurround = "87" => "Neural Surr",
        NeuralThx = "88" => "Neural THX",
        PliiThxGames = "89" => "PLII/PLIIx THX Games",
        Neo6ThxGames = "8A" => "Neo:6 THX Games",
        PliiThxMusic = "8B" => "PLII/PLIIx THX Music",
        Neo6ThxMusic = "8C" => "Neo:6 THX Music",
        NeuralThxCinema = "8D" => "Neural THX Cinema",
        NeuralThxMusic = "8E" => "Neural THX Music",
        NeuralThxGames = "8F" => "Neural THX Games",
        PliizHeight = "90" => "PLIIz Height",
        Neo6CinemaDtsSurroundSensation = "91" => "Neo 6 Cinema DTS Surround Sensation",
        Neo6MusicDtsSurroundSensation = "92" => "Neo 6 Music DTS Surround Sensation",
        NeuralDigitalMusic = "93" => "Neural Digital Music",
        PliizHeightThxCinema = "94" => "PLIIz Height + THX Cinema",
        PliizHeightThxMusic = "95" => "PLIIz Height + THX Music",
        PliizHeightThxGames = "96" => "PLIIz Height + THX Games",
        PliizHeightThxU2Cinema = "97" => "PLIIz Height + THX U2/S2 Cinema",
        PliizHeightThxU2Music = "98" => "PLIIz Height + THX U2/S2 Music",
        PliizHeightThxU2Games = "99" => "PLIIz Height + THX U2/S2 Games",
        NeoXGame = "9A" => "Neo:X Game",
        PliiMovieDsx = "A0" => "PLIIx/PLII Movie + Audyssey DSX",
        PliiMusicDsx = "A1" => "PLIIx/PLII Music + Audyssey DSX",
        PliiGameDsx = "A2" => "PLIIx/PLII Game + Audyssey DSX",
        Neo6CinemaDsx = "A3" => "Neo:6 Cinema + Audyssey DSX",
        Neo6MusicDsx = "A4" => "Neo:6 Music + Audyssey DSX",
        NeuralSurroundDsx = "A5" => "Neural Surround + Audyssey DSX",
        NeuralDigitalMusicDsx = "A6" => "Neural Digital Music + Audyssey DSX",
        DolbyExDsx = "A7" => "Dolby EX + Audyssey DSX",
    }
}

code_table! {
    /// HDMI output routing, main zone only
    HdmiOutput {
        Analog = "00" => "NO ··· ANALOG",
        Main = "01" => "YES ··· OUT",
        Sub = "02" => "OUT-SUB",
        Both = "03" => "BOTH",
        BothMain = "04" => "BOTH(MAIN)",
        BothSub = "05" => "BOTH(SUB)",
    }
}

/// Splits an `IFA`/`IFV` value into trimmed fields; missing or empty ones are `None`
fn info_fields(value: &str) -> impl Iterator<Item = Option<String>> + '_ {
    value
        .split(',')
        .map(|field| {
            let field = field.trim();
            (!field.is_empty()).then(|| field.to_string())
        })
        .chain(std::iter::repeat(None))
}

/// Audio signal details from an `IFA` report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub input_port: Option<String>,
    pub format: Option<String>,
    pub input_frequency: Option<String>,
    pub input_channels: Option<String>,
    pub listening_mode: Option<String>,
    pub output_channels: Option<String>,
    pub output_frequency: Option<String>,
}

impl AudioInfo {
    /// Parse the comma separated value, e.g. `HDMI 1,PCM,48 kHz,2.0 ch,Stereo,5.1 ch,`
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            return None;
        }
        let mut fields = info_fields(value);
        let mut next = || fields.next().flatten();
        Some(AudioInfo {
            input_port: next(),
            format: next(),
            input_frequency: next(),
            input_channels: next(),
            listening_mode: next(),
            output_channels: next(),
            output_frequency: next(),
        })
    }
}

/// Video signal details from an `IFV` report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub input_port: Option<String>,
    pub input_resolution: Option<String>,
    pub input_color_schema: Option<String>,
    pub input_color_depth: Option<String>,
    pub output_port: Option<String>,
    pub output_resolution: Option<String>,
    pub output_color_schema: Option<String>,
    pub output_color_depth: Option<String>,
    pub picture_mode: Option<String>,
}

impl VideoInfo {
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            return None;
        }
        let mut fields = info_fields(value);
        let mut next = || fields.next().flatten();
        Some(VideoInfo {
            input_port: next(),
            input_resolution: next(),
            input_color_schema: next(),
            input_color_depth: next(),
            output_port: next(),
            output_resolution: next(),
            output_color_schema: next(),
            output_color_depth: next(),
            picture_mode: next(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddress = "0009B0D00BD5".parse().unwrap();
        assert_eq!(mac.to_string(), "00:09:B0:D0:0B:D5");
        assert_eq!("00:09:b0:d0:0b:d5".parse::<MacAddress>().unwrap(), mac);
        assert_eq!("0009B0D00BD50000".parse::<MacAddress>().unwrap(), mac);
        assert!("0009B0".parse::<MacAddress>().is_err());
        assert!("ZZ09B0D00BD5".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_input_source_codes() {
        assert_eq!(InputSource::from_code("2b"), InputSource::Network);
        assert_eq!(InputSource::Network.code(), "2B");
        assert_eq!(InputSource::from_code("FF"), InputSource::Other("FF".to_string()));
        assert_eq!(InputSource::from_meaning("TV"), Some(InputSource::Tv));
        assert_eq!(InputSource::Tv.to_string(), "TV");
    }

    #[test]
    fn test_listening_mode_meanings_are_case_sensitive() {
        assert_eq!(ListeningMode::from_meaning("ACTION"), Some(ListeningMode::Action));
        assert_eq!(ListeningMode::from_meaning("Action"), Some(ListeningMode::GameAction));
    }

    #[test]
    fn test_volume_resolution_validation() {
        assert!(VolumeResolution::try_from(80).is_ok());
        assert!(VolumeResolution::try_from(64).is_err());
        let parsed: VolumeResolution = serde_json::from_str("200").unwrap();
        assert_eq!(parsed.steps(), 200);
        assert!(serde_json::from_str::<VolumeResolution>("7").is_err());
    }

    #[test]
    fn test_zone_round_trips_through_str() {
        for zone in Zone::ALL {
            assert_eq!(zone.as_str().parse::<Zone>().unwrap(), zone);
        }
    }

    #[test]
    fn test_audio_info_fields() {
        let info = AudioInfo::parse("HDMI 1,PCM,48 kHz,2.0 ch,Stereo,5.1 ch,").unwrap();
        assert_eq!(info.input_port.as_deref(), Some("HDMI 1"));
        assert_eq!(info.format.as_deref(), Some("PCM"));
        assert_eq!(info.input_frequency.as_deref(), Some("48 kHz"));
        assert_eq!(info.listening_mode.as_deref(), Some("Stereo"));
        assert_eq!(info.output_channels.as_deref(), Some("5.1 ch"));
        assert_eq!(info.output_frequency, None);
        assert_eq!(AudioInfo::parse(""), None);
    }

    #[test]
    fn test_video_info_skips_empty_fields() {
        let info = VideoInfo::parse("HDMI 2,1920 x 1080p 60 Hz,RGB,24bit,HDMI Main,,RGB,24bit,Custom").unwrap();
        assert_eq!(info.input_resolution.as_deref(), Some("1920 x 1080p 60 Hz"));
        assert_eq!(info.output_port.as_deref(), Some("HDMI Main"));
        assert_eq!(info.output_resolution, None);
        assert_eq!(info.picture_mode.as_deref(), Some("Custom"));
    }

    #[test]
    fn test_hdmi_output_codes() {
        assert_eq!(HdmiOutput::from_code("03"), HdmiOutput::Both);
        assert_eq!(HdmiOutput::Sub.code(), "02");
    }
}

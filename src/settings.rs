// ============================================================================
// Application settings — plain key=value file in the platform config dir
// ============================================================================

use std::path::PathBuf;

/// User-tunable settings persisted across sessions.
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Base URL of the inpaint service; `/api/inpaint` is appended.
    pub inpaint_endpoint: String,
    /// Ask the service to use its internal model variant.
    pub internal_model: bool,
    /// Board surface size used for rasterization/export.
    pub board_width: u32,
    pub board_height: u32,
    /// Export background, RGBA.
    pub background: [u8; 4],
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            inpaint_endpoint: "http://localhost:3001".to_string(),
            internal_model: false,
            board_width: 1280,
            board_height: 800,
            background: [255, 255, 255, 255],
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// Linux:   `~/.config/moodboard/moodboard_settings.cfg` (XDG respected)
    /// Windows: `%APPDATA%\Moodboard\moodboard_settings.cfg`
    /// macOS:   `~/Library/Application Support/Moodboard/moodboard_settings.cfg`
    pub(crate) fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        let dir = {
            let base = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                });
            base.join("moodboard")
        };
        #[cfg(target_os = "windows")]
        let dir = {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            PathBuf::from(appdata).join("Moodboard")
        };
        #[cfg(target_os = "macos")]
        let dir = {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("Moodboard")
        };
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        let dir = std::env::current_exe().ok()?.parent()?.to_path_buf();

        let _ = std::fs::create_dir_all(&dir);
        Some(dir.join("moodboard_settings.cfg"))
    }

    /// Load settings from disk, falling back to defaults for a missing file
    /// or any unparseable line.
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_file_format(&content),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to disk. Failures are logged and otherwise ignored —
    /// settings are reconstructible.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else {
            return;
        };
        if let Err(e) = std::fs::write(&path, self.to_file_format()) {
            crate::log_warn!("settings: could not write {}: {}", path.display(), e);
        }
    }

    fn to_file_format(&self) -> String {
        format!(
            "inpaint_endpoint={}\n\
             internal_model={}\n\
             board_width={}\n\
             board_height={}\n\
             background={},{},{},{}\n",
            self.inpaint_endpoint,
            self.internal_model,
            self.board_width,
            self.board_height,
            self.background[0],
            self.background[1],
            self.background[2],
            self.background[3],
        )
    }

    /// Parse line-by-line; unknown keys and malformed values keep defaults so
    /// old/newer settings files always load.
    fn from_file_format(content: &str) -> Self {
        let mut settings = Self::default();
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "inpaint_endpoint" => {
                    let v = value.trim();
                    if !v.is_empty() {
                        settings.inpaint_endpoint = v.to_string();
                    }
                }
                "internal_model" => {
                    if let Ok(v) = value.trim().parse() {
                        settings.internal_model = v;
                    }
                }
                "board_width" => {
                    if let Ok(v) = value.trim().parse::<u32>() {
                        settings.board_width = v.max(1);
                    }
                }
                "board_height" => {
                    if let Ok(v) = value.trim().parse::<u32>() {
                        settings.board_height = v.max(1);
                    }
                }
                "background" => {
                    let parts: Vec<_> = value.split(',').map(str::trim).collect();
                    if parts.len() == 4
                        && let (Ok(r), Ok(g), Ok(b), Ok(a)) = (
                            parts[0].parse(),
                            parts[1].parse(),
                            parts[2].parse(),
                            parts[3].parse(),
                        )
                    {
                        settings.background = [r, g, b, a];
                    }
                }
                _ => {}
            }
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_format_round_trip() {
        let settings = AppSettings {
            inpaint_endpoint: "https://ai.example.com".into(),
            internal_model: true,
            board_width: 640,
            board_height: 480,
            background: [10, 20, 30, 255],
        };
        let restored = AppSettings::from_file_format(&settings.to_file_format());
        assert_eq!(restored, settings);
    }

    #[test]
    fn unknown_keys_and_garbage_lines_keep_defaults() {
        let content = "future_flag=yes\nboard_width=banana\nnot a line\nbackground=1,2\n";
        assert_eq!(AppSettings::from_file_format(content), AppSettings::default());
    }
}

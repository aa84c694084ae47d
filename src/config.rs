//! Configuração do stepcam carregada de `stepcam.toml` e do ambiente.
//!
//! A struct [`StepcamConfig`] contém todos os parâmetros do serviço.
//! Valores ausentes no arquivo usam defaults sensíveis; as variáveis de
//! ambiente (`OPC_SERVER_URL`, `TAG_NAME`, `VALID_STEPS`, ...) têm precedência
//! sobre o arquivo, como na implantação em contêiner.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::capture::{CaptureSettings, MAX_FRAMES};
use crate::error::ConfigError;
use crate::supervisor::SupervisorSettings;
use crate::tags::TagRoles;

/// Arquivo lido quando `--config` não é informado.
pub const DEFAULT_CONFIG_FILE: &str = "stepcam.toml";

/// Configuração de nível superior do serviço.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StepcamConfig {
    /// Endereço do servidor de tags (`OPC_SERVER_URL`).
    pub server_url: String,

    /// Identificador do nó da tag de passo (`TAG_NAME`).
    pub step_tag: String,

    /// Tag de gate opcional (`GATE_TAG`); sem ela toda captura é permitida.
    pub gate_tag: Option<String>,

    /// Tag de produto opcional (`PRODUCT_TAG`) para capturas de troca de produto.
    pub product_tag: Option<String>,

    /// Valor do gate que libera capturas (`READY_VALUE`).
    pub ready_value: f64,

    /// Nome do equipamento, segundo nível do diretório de imagens (`EQUIPMENT`).
    pub equipment: String,

    /// Tabela de políticas `passo;atraso;estratégia, ...` (`VALID_STEPS`).
    pub valid_steps: String,

    /// Quadros gravados por sessão (`NUMBER_OF_PICTURES`), limitado a 100.
    pub number_of_pictures: usize,

    pub camera_index: u32,
    pub fallback_camera_index: u32,

    /// Raiz do diretório de imagens (`BASE_IMAGE_SAVE_PATH`).
    pub base_image_save_path: PathBuf,

    pub image_extension: String,

    /// Quadros lidos e descartados antes de gravar (`WARMUP_FRAMES`). O backend
    /// ffmpeg abre o dispositivo a cada quadro e não tem buffer, por isso 0.
    pub warmup_frames: usize,
    pub frame_pause_ms: u64,

    pub heartbeat_secs: u64,
    pub subscription_interval_ms: u64,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for StepcamConfig {
    fn default() -> Self {
        Self {
            server_url: "tcp://127.0.0.1:4841".to_string(),
            step_tag: String::new(),
            gate_tag: None,
            product_tag: None,
            ready_value: 128.0,
            equipment: "EQUIPMENT".to_string(),
            valid_steps: String::new(),
            number_of_pictures: 1,
            camera_index: 0,
            fallback_camera_index: 1,
            base_image_save_path: PathBuf::from("./data"),
            image_extension: "png".to_string(),
            warmup_frames: 0,
            frame_pause_ms: 200,
            heartbeat_secs: 1,
            subscription_interval_ms: 500,
            backoff_initial_secs: 15,
            backoff_max_secs: 300,
        }
    }
}

impl StepcamConfig {
    /// Carrega `path` (ou `stepcam.toml` no diretório atual, se existir) e
    /// aplica as variáveis de ambiente do processo por cima.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.number_of_pictures = config.number_of_pictures.min(MAX_FRAMES);
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config in {}", path.display()))
    }

    /// Sobrepõe os campos com as variáveis encontradas por `lookup`.
    /// Variáveis vazias são ignoradas; valores numéricos inválidos são erro.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("OPC_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = var("TAG_NAME") {
            self.step_tag = v;
        }
        if let Some(v) = var("GATE_TAG") {
            self.gate_tag = Some(v);
        }
        if let Some(v) = var("PRODUCT_TAG") {
            self.product_tag = Some(v);
        }
        if let Some(v) = var("EQUIPMENT") {
            self.equipment = v;
        }
        if let Some(v) = var("VALID_STEPS") {
            self.valid_steps = v;
        }
        if let Some(v) = var("BASE_IMAGE_SAVE_PATH") {
            self.base_image_save_path = PathBuf::from(v);
        }
        if let Some(v) = var("IMAGE_EXTENSION") {
            self.image_extension = v.trim_start_matches('.').to_string();
        }

        parse_into(&var, "READY_VALUE", &mut self.ready_value)?;
        parse_into(&var, "NUMBER_OF_PICTURES", &mut self.number_of_pictures)?;
        parse_into(&var, "CAMERA_INDEX", &mut self.camera_index)?;
        parse_into(&var, "FALLBACK_CAMERA_INDEX", &mut self.fallback_camera_index)?;
        parse_into(&var, "WARMUP_FRAMES", &mut self.warmup_frames)?;
        parse_into(&var, "FRAME_PAUSE_MS", &mut self.frame_pause_ms)?;
        parse_into(&var, "HEARTBEAT_SECS", &mut self.heartbeat_secs)?;
        parse_into(&var, "SUBSCRIPTION_INTERVAL_MS", &mut self.subscription_interval_ms)?;
        parse_into(&var, "BACKOFF_INITIAL_SECS", &mut self.backoff_initial_secs)?;
        parse_into(&var, "BACKOFF_MAX_SECS", &mut self.backoff_max_secs)?;
        Ok(())
    }

    /// Gate ready value, only when a gate tag is configured.
    pub fn gate_ready(&self) -> Option<f64> {
        self.gate_tag.as_ref().map(|_| self.ready_value)
    }

    pub fn tag_roles(&self) -> TagRoles {
        TagRoles {
            step: self.step_tag.clone(),
            gate: self.gate_tag.clone(),
            product: self.product_tag.clone(),
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            base_path: self.base_image_save_path.clone(),
            equipment: self.equipment.clone(),
            frame_count: self.number_of_pictures.min(MAX_FRAMES),
            warmup_frames: self.warmup_frames,
            frame_pause: Duration::from_millis(self.frame_pause_ms),
            extension: self.image_extension.clone(),
            camera_index: self.camera_index,
            fallback_index: self.fallback_camera_index,
        }
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            endpoint: self.server_url.clone(),
            roles: self.tag_roles(),
            heartbeat: Duration::from_secs(self.heartbeat_secs.max(1)),
            subscription_interval: Duration::from_millis(self.subscription_interval_ms),
            backoff_initial: Duration::from_secs(self.backoff_initial_secs),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
        }
    }
}

// Converte a variável `name`, se presente, para o tipo do campo.
fn parse_into<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    field: &mut T,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = var(name) {
        *field = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config_values() {
        let config = StepcamConfig::default();
        assert_eq!(config.ready_value, 128.0);
        assert_eq!(config.base_image_save_path, PathBuf::from("./data"));
        assert_eq!(config.backoff_initial_secs, 15);
        assert_eq!(config.backoff_max_secs, 300);
        assert_eq!(config.image_extension, "png");
        assert_eq!(config.warmup_frames, 0);
        assert!(config.gate_tag.is_none());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            step_tag = "ns=2;s=FILTRACAO.PASSO"
            gate_tag = "ns=2;s=FILTRACAO.STATUS"
            valid_steps = "1;0;1, 3;2;3"
            number_of_pictures = 5
        "#;
        let config: StepcamConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.step_tag, "ns=2;s=FILTRACAO.PASSO");
        assert_eq!(config.gate_ready(), Some(128.0));
        assert_eq!(config.number_of_pictures, 5);
        assert_eq!(config.heartbeat_secs, 1);
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = StepcamConfig {
            step_tag: "from-file".into(),
            ..StepcamConfig::default()
        };
        config
            .apply_env(env(&[
                ("TAG_NAME", "ns=2;s=PASSO"),
                ("PRODUCT_TAG", "ns=2;s=PRODUTO"),
                ("NUMBER_OF_PICTURES", " 3 "),
                ("READY_VALUE", "64"),
                ("EQUIPMENT", ""),
            ]))
            .unwrap();

        assert_eq!(config.step_tag, "ns=2;s=PASSO");
        assert_eq!(config.product_tag.as_deref(), Some("ns=2;s=PRODUTO"));
        assert_eq!(config.number_of_pictures, 3);
        assert_eq!(config.ready_value, 64.0);
        assert_eq!(config.equipment, "EQUIPMENT");
    }

    #[test]
    fn malformed_number_is_config_error() {
        let mut config = StepcamConfig::default();
        let err = config
            .apply_env(env(&[("CAMERA_INDEX", "front")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: "CAMERA_INDEX", .. }));
    }

    #[test]
    fn gate_ready_requires_gate_tag() {
        let config = StepcamConfig::default();
        assert_eq!(config.gate_ready(), None);
    }

    #[test]
    fn capture_settings_clamp_frame_count() {
        let config = StepcamConfig {
            number_of_pictures: 500,
            image_extension: "jpg".into(),
            ..StepcamConfig::default()
        };
        let settings = config.capture_settings();
        assert_eq!(settings.frame_count, MAX_FRAMES);
        assert_eq!(settings.extension, "jpg");
        assert_eq!(settings.frame_pause, Duration::from_millis(200));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stepcam.toml");
        std::fs::write(&path, "equipment = \"DECANTADOR\"\nbackoff_max_secs = 60\n").unwrap();

        let config = StepcamConfig::load(Some(&path)).unwrap();
        assert_eq!(config.supervisor_settings().backoff_max, Duration::from_secs(60));
    }

    #[test]
    fn load_rejects_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StepcamConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}

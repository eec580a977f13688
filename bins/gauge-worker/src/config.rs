// Worker configuration: language table and run settings
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub image: String,
    /// Source file name inside the container working directory
    pub file_name: String,
    /// Interpreted languages may only syntax-check here, or skip the step
    #[serde(default)]
    pub compile_command: Option<String>,
    pub run_command: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub compile_timeout_ms: u64,
    pub test_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path).context("Failed to read languages.json")?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            configs.insert(lang.name.clone(), lang);
        }

        Ok(Self { configs })
    }

    /// Load with default path (config/languages.json)
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new("config/languages.json"))
    }

    pub fn get_config(&self, language: &str) -> Result<&LanguageConfig> {
        self.configs
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    pub fn list_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.configs.keys().cloned().collect();
        languages.sort();
        languages
    }
}

/// Judge variants the worker can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeKind {
    Local,
    Online,
}

impl JudgeKind {
    fn parse(name: &str) -> Result<Self> {
        match name.trim() {
            "local_evaluator" => Ok(JudgeKind::Local),
            "online_judge" => Ok(JudgeKind::Online),
            other => bail!("Unknown judge: {} (valid: local_evaluator, online_judge)", other),
        }
    }
}

/// Evaluation run settings read from the environment
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub exp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub problems_path: PathBuf,
    pub predictions_dir: PathBuf,
    pub judges: Vec<JudgeKind>,
    pub language: String,
    pub workers: usize,
    pub override_existing: bool,
    pub complete_override: bool,
    pub redis_url: String,
}

fn env_flag(name: &str) -> Result<bool> {
    match env::var(name) {
        Err(_) => Ok(false),
        Ok(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => bail!("{} must be a boolean, got {}", name, other),
        },
    }
}

fn env_path(name: &str) -> Result<PathBuf> {
    env::var(name)
        .map(PathBuf::from)
        .with_context(|| format!("{} is not set", name))
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let exp_dir = env_path("GAUGE_EXP_DIR")?;
        let output_dir = env::var("GAUGE_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| exp_dir.clone());
        let predictions_dir = env::var("GAUGE_PREDICTIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| exp_dir.join("predictions"));

        let judges = env::var("GAUGE_JUDGES")
            .unwrap_or_else(|_| "local_evaluator".to_string())
            .split(',')
            .map(JudgeKind::parse)
            .collect::<Result<Vec<_>>>()?;

        let workers = match env::var("GAUGE_WORKERS") {
            Ok(value) => value
                .parse::<usize>()
                .with_context(|| format!("GAUGE_WORKERS must be a positive integer, got {}", value))?,
            Err(_) => 1,
        };
        if workers == 0 {
            bail!("GAUGE_WORKERS must be at least 1");
        }

        Ok(Self {
            exp_dir,
            output_dir,
            problems_path: env_path("GAUGE_PROBLEMS")?,
            predictions_dir,
            judges,
            language: env::var("GAUGE_LANGUAGE").unwrap_or_else(|_| "python3".to_string()),
            workers,
            override_existing: env_flag("GAUGE_OVERRIDE")?,
            complete_override: env_flag("GAUGE_COMPLETE_OVERRIDE")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANGUAGES: &str = r#"{
        "languages": [
            {
                "name": "python3",
                "image": "python:3.11-slim",
                "file_name": "main.py",
                "compile_command": "python3 -m py_compile main.py",
                "run_command": "python3 -u main.py",
                "memory_limit_mb": 512,
                "cpu_limit": 1.0,
                "compile_timeout_ms": 30000,
                "test_timeout_ms": 10000
            },
            {
                "name": "cpp",
                "image": "gcc:13",
                "file_name": "main.cpp",
                "compile_command": "g++ -O2 -o main main.cpp",
                "run_command": "./main",
                "memory_limit_mb": 256,
                "cpu_limit": 1.0,
                "compile_timeout_ms": 60000,
                "test_timeout_ms": 5000
            }
        ]
    }"#;

    #[test]
    fn test_parse_language_table() {
        let manager = LanguageConfigManager::from_json(LANGUAGES).unwrap();
        assert_eq!(manager.list_languages(), vec!["cpp", "python3"]);
        let cpp = manager.get_config("cpp").unwrap();
        assert_eq!(cpp.file_name, "main.cpp");
        assert_eq!(cpp.compile_command.as_deref(), Some("g++ -O2 -o main main.cpp"));
        assert!(manager.get_config("cobol").is_err());
    }

    #[test]
    fn test_judge_names() {
        assert_eq!(JudgeKind::parse("local_evaluator").unwrap(), JudgeKind::Local);
        assert_eq!(JudgeKind::parse(" online_judge").unwrap(), JudgeKind::Online);
        assert!(JudgeKind::parse("codeforces").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(LanguageConfigManager::load(Path::new("/nonexistent/languages.json")).is_err());
    }
}

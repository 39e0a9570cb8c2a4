use super::*;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.data_root, PathBuf::from("data"));
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.model, "all-minilm:latest");
    assert_eq!(config.llm.model, "llama3-8b-8192");
    assert_eq!(config.llm.api_key_env, "GROQ_API_KEY");
    assert_eq!(config.chunking.chunk_size, 500);
    assert_eq!(config.chunking.chunk_overlap, 50);
    assert_eq!(config.retrieval.top_k, 4);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_overlap = 500;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::OverlapTooLarge(500, 500))
    ));

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_size = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.retrieval.top_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.llm.temperature = 3.5;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.llm.base_url = "not a url".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.llm.api_key_env = "  ".to_string();
    assert!(invalid_config.validate().is_err());
}

#[test]
fn hashing_provider_skips_ollama_validation() {
    let mut config = Config::default();
    config.embeddings.provider = EmbeddingProvider::Hashing;
    config.ollama.port = 0;
    assert!(config.validate().is_ok());

    config.embeddings.hashing_dimension = 2;
    assert!(config.validate().is_err());
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config {
        roster_path: Some(PathBuf::from("/srv/hr/roster.csv")),
        ..Config::default()
    };
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
data_root = "/srv/corpus"

[chunking]
chunk_size = 800

[embeddings]
provider = "hashing"
"#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.data_root, PathBuf::from("/srv/corpus"));
    assert_eq!(parsed.chunking.chunk_size, 800);
    assert_eq!(parsed.chunking.chunk_overlap, 50);
    assert_eq!(parsed.embeddings.provider, EmbeddingProvider::Hashing);
    assert_eq!(parsed.ollama, OllamaConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_model("new-model".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_model(String::new()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_batch_size(1001).is_err());
}

#[test]
fn load_missing_config_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("missing config should load");
    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(config.vector_database_path(), temp_dir.path().join("vectors"));
}

#[test]
fn save_then_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::load(temp_dir.path()).expect("should load defaults");
    config.data_root = PathBuf::from("/srv/knowledge");
    config.retrieval.top_k = 6;
    config.save().expect("should save config");

    let loaded = Config::load(temp_dir.path()).expect("should load saved config");
    assert_eq!(loaded, config);
}

#[test]
fn invalid_file_fails_to_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[chunking]\nchunk_size = 10\nchunk_overlap = 20\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn roster_path_defaults_under_hr() {
    let config = Config {
        data_root: PathBuf::from("/srv/data"),
        ..Config::default()
    };
    assert_eq!(config.roster_path(), PathBuf::from("/srv/data/hr/hr_data.csv"));

    let config = Config {
        roster_path: Some(PathBuf::from("/etc/roster.csv")),
        ..config
    };
    assert_eq!(config.roster_path(), PathBuf::from("/etc/roster.csv"));
}

#[test]
#[serial]
fn api_key_from_environment() {
    let llm = LlmConfig {
        api_key_env: "DEPT_ASSISTANT_TEST_KEY".to_string(),
        ..LlmConfig::default()
    };

    // SAFETY: serialised with the other environment tests
    unsafe { std::env::remove_var("DEPT_ASSISTANT_TEST_KEY") };
    assert!(matches!(
        llm.api_key(),
        Err(ConfigError::MissingCredential(name)) if name == "DEPT_ASSISTANT_TEST_KEY"
    ));

    // SAFETY: serialised with the other environment tests
    unsafe { std::env::set_var("DEPT_ASSISTANT_TEST_KEY", "secret") };
    assert_eq!(llm.api_key().expect("key should be found"), "secret");

    // SAFETY: serialised with the other environment tests
    unsafe { std::env::remove_var("DEPT_ASSISTANT_TEST_KEY") };
}

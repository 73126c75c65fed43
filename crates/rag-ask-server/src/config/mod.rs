pub mod settings;

pub use settings::{
    EmbeddingSettings, IngestSettings, RerankerSettings, ServerConfig, Settings,
    VectorStoreSettings,
};

pub mod cloud;

pub use cloud::{
    CloudEnv, CloudEnvOptions, CloudError, CloudResult, InMemoryLogStream, InMemoryObjectStore,
    ReadFile, WriteFile,
};

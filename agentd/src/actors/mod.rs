pub mod agent;
pub mod credentials;
pub mod state_store;

pub use agent::{AgentActor, AgentArguments, AgentError, AgentMsg};
pub use credentials::{CredentialStoreActor, CredentialStoreArguments, CredentialStoreMsg};
pub use state_store::{StateStoreActor, StateStoreArguments, StateStoreMsg};

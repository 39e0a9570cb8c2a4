// Session module
// Per-user state: authentication, the department chain, and the transcript


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::auth::check_access;
use crate::chat::{ChatModel, RagAnswer, RagChain};
use crate::indexer::VectorStoreManager;
use crate::{AssistantError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    #[inline]
    pub fn new<S: Into<String>>(role: Role, text: S) -> Self {
        Self {
            role,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// State of one interactive user, from login to logout.
///
/// The chain is created once per session; the index it wraps comes from the
/// process-wide [`VectorStoreManager`] so sessions share built indexes.
pub struct Session {
    roster_path: PathBuf,
    top_k: usize,
    user_name: Option<String>,
    department: Option<String>,
    chain: Option<RagChain>,
    transcript: Vec<Turn>,
}

impl Session {
    #[inline]
    pub fn new<P: AsRef<Path>>(roster_path: P, top_k: usize) -> Self {
        Self {
            roster_path: roster_path.as_ref().to_path_buf(),
            top_k,
            user_name: None,
            department: None,
            chain: None,
            transcript: Vec::new(),
        }
    }

    #[inline]
    pub const fn is_authenticated(&self) -> bool {
        self.department.is_some()
    }

    #[inline]
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// Department as entered at login, trimmed
    #[inline]
    pub fn department(&self) -> Option<&str> {
        self.department.as_deref()
    }

    #[inline]
    pub const fn is_chat_open(&self) -> bool {
        self.chain.is_some()
    }

    #[inline]
    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    /// Check the pair against the roster and start the session on a match
    ///
    /// # Arguments
    ///
    /// * `name` - Employee name as typed at login
    /// * `department` - Department as typed at login
    ///
    /// # Returns
    ///
    /// `InvalidInput` for a blank field, `AccessDenied` when the roster has no
    /// such pair, `Config` when the roster cannot be read
    #[inline]
    pub fn authenticate(&mut self, name: &str, department: &str) -> Result<()> {
        let name = name.trim();
        let department = department.trim();
        if name.is_empty() || department.is_empty() {
            return Err(AssistantError::InvalidInput(
                "Please provide both name and department".to_string(),
            ));
        }

        let allowed = check_access(&self.roster_path, name, department).map_err(|e| {
            error!("Authentication error: {:#}", e);
            AssistantError::Config(format!("Authentication error: {:#}", e))
        })?;

        if !allowed {
            info!("Denied access for '{}' to department '{}'", name, department);
            return Err(AssistantError::AccessDenied(
                "You are not registered in that department.".to_string(),
            ));
        }

        self.logout();
        self.user_name = Some(name.to_string());
        self.department = Some(department.to_string());
        info!("Authenticated '{}' for department '{}'", name, department);
        Ok(())
    }

    /// Load the department's index and connect the language model.
    ///
    /// Does nothing once the chat is open. The model is only requested after
    /// the index is known to exist.
    #[inline]
    pub async fn open_chat<F>(&mut self, manager: &VectorStoreManager, llm_factory: F) -> Result<()>
    where
        F: FnOnce() -> Result<Arc<dyn ChatModel>>,
    {
        if self.chain.is_some() {
            return Ok(());
        }

        let department = self
            .department
            .clone()
            .ok_or_else(|| AssistantError::AccessDenied("Not authenticated".to_string()))?;

        let index = manager
            .get_department_index(&department)
            .await?
            .ok_or_else(|| AssistantError::NoContent(department.clone()))?;

        let llm = llm_factory()?;

        info!(
            "Opened chat for '{}' with {} indexed chunks, model {}",
            department,
            index.chunk_count(),
            llm.model_name()
        );

        self.chain = Some(RagChain::new(index, manager.embedder(), llm, self.top_k));
        Ok(())
    }

    /// Answer `question`, recording both turns only when it succeeds
    #[inline]
    pub async fn ask(&mut self, question: &str) -> Result<RagAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AssistantError::InvalidInput(
                "Please enter a question".to_string(),
            ));
        }

        let chain = self
            .chain
            .as_ref()
            .ok_or_else(|| AssistantError::Config("Chat is not open".to_string()))?;

        let answer = chain.answer(question).await?;

        self.transcript.push(Turn::new(Role::User, question));
        self.transcript.push(Turn::new(Role::Assistant, answer.answer.clone()));
        Ok(answer)
    }

    /// Forget the user, the chain and the transcript
    #[inline]
    pub fn logout(&mut self) {
        self.user_name = None;
        self.department = None;
        self.chain = None;
        self.transcript.clear();
    }
}

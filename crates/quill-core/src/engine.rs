//! Conversation engine
//!
//! `ChatEngine` is the single entry point embedders talk to: it owns the
//! provider adapters, the session lifecycle, context budgeting, and the
//! notification bus. Anything a user should see about a failed request is
//! appended to the conversation log itself; `Err` returns are reserved for
//! rejected re-entrancy, invalid input, and persistence failures.

use crate::config::{QuillConfig, SettingsPatch};
use crate::context::{
    replacement_entries, summary_prompt, ContextBudget, SummaryPolicy, TokenEstimator,
};
use crate::error::{QuillError, QuillResult};
use crate::events::{Notification, NotificationBus};
use crate::history::{ConversationEntry, PatchKey};
use crate::llm::{
    build_provider, collect_final, ChatStream, ModelDescriptor, Provider, ProviderKind,
    StreamEvent,
};
use crate::session::{KeyValueStore, Session, SessionManager, SessionMeta};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How the user resolved a stale-snapshot prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleResolution {
    /// Replace the snapshot with the current file content, then send
    Update,
    /// Send with the stored snapshot as-is
    Keep,
    /// Abort the send entirely
    Cancel,
}

/// Read access to the live files behind attached snapshots.
///
/// Embedders wire this to their workspace; an engine built without one
/// skips staleness checks.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Current content of `path`, or `None` if the file no longer exists.
    async fn read(&self, path: &str) -> Option<String>;
}

/// Asks the user what to do about a snapshot that diverged from disk.
#[async_trait]
pub trait StaleContextPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> StaleResolution;
}

/// What a [`ChatEngine::send`] call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The model turn completed and is in the history
    Completed,
    /// The active provider is unconfigured; a notice was appended and
    /// nothing was sent
    Refused,
    /// The user cancelled at the stale-snapshot prompt; the draft is intact
    Cancelled,
    /// Request setup or the stream failed; an error entry was appended
    Failed,
}

/// Marks a session as having an operation in flight; dropping it clears
/// the mark even when the operation unwinds early.
struct FlightGuard<'a> {
    registry: &'a Mutex<HashMap<Uuid, &'static str>>,
    session_id: Uuid,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.session_id);
    }
}

/// Token-budget-aware conversation engine.
pub struct ChatEngine {
    config: RwLock<QuillConfig>,
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
    sessions: SessionManager,
    budget: ContextBudget,
    estimator: TokenEstimator,
    bus: NotificationBus,
    in_flight: Mutex<HashMap<Uuid, &'static str>>,
    file_source: Option<Arc<dyn FileSource>>,
    stale_prompt: Option<Arc<dyn StaleContextPrompt>>,
    config_path: Option<PathBuf>,
}

impl ChatEngine {
    /// Build an engine over the given configuration and session storage,
    /// restoring the most recent session.
    pub async fn new(config: QuillConfig, storage: Arc<dyn KeyValueStore>) -> QuillResult<Self> {
        let sessions = SessionManager::load(storage).await?;
        let mut providers: HashMap<ProviderKind, Arc<dyn Provider>> = HashMap::new();
        for kind in ProviderKind::all() {
            providers.insert(kind, build_provider(kind, config.provider(kind)));
        }
        Ok(Self {
            config: RwLock::new(config),
            providers,
            sessions,
            budget: ContextBudget::default(),
            estimator: TokenEstimator::new(),
            bus: NotificationBus::default(),
            in_flight: Mutex::new(HashMap::new()),
            file_source: None,
            stale_prompt: None,
            config_path: None,
        })
    }

    /// Replace the adapter registered for its kind. Embedders use this to
    /// inject custom or scripted transports.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Wire up live-file reads for snapshot staleness checks.
    pub fn with_file_source(mut self, source: Arc<dyn FileSource>) -> Self {
        self.file_source = Some(source);
        self
    }

    /// Wire up the stale-snapshot confirmation prompt.
    pub fn with_stale_prompt(mut self, prompt: Arc<dyn StaleContextPrompt>) -> Self {
        self.stale_prompt = Some(prompt);
        self
    }

    /// Settings changes are saved to this path as TOML.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Bus carrying engine notifications; subscribe before calling
    /// [`send`](Self::send) to observe the full stream lifecycle.
    pub fn notifications(&self) -> &NotificationBus {
        &self.bus
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> QuillConfig {
        self.config.read().clone()
    }

    fn publish(&self, notification: Notification) {
        self.bus.publish(notification);
    }

    // ---- providers ----

    pub fn active_provider_kind(&self) -> ProviderKind {
        self.config.read().active_provider
    }

    /// Adapter for the active provider.
    pub fn active_provider(&self) -> Arc<dyn Provider> {
        let kind = self.config.read().active_provider;
        self.provider(kind)
    }

    /// Adapter for a specific provider.
    pub fn provider(&self, kind: ProviderKind) -> Arc<dyn Provider> {
        match self.providers.get(&kind) {
            Some(adapter) => Arc::clone(adapter),
            None => build_provider(kind, self.config.read().provider(kind)),
        }
    }

    /// Switch the provider used for chats and summarization.
    pub fn set_active_provider(&self, kind: ProviderKind) -> QuillResult<()> {
        self.config.write().active_provider = kind;
        self.persist_config()
    }

    /// Apply a settings patch to one provider. The adapter validates and
    /// commits first; only then is the engine configuration updated and
    /// saved, so a rejected patch leaves everything untouched.
    pub async fn apply_provider_settings(
        &self,
        kind: ProviderKind,
        patch: SettingsPatch,
    ) -> QuillResult<()> {
        let adapter = self.provider(kind);
        adapter.apply_settings(patch).await?;
        self.config.write().providers.insert(kind, adapter.settings());
        self.persist_config()
    }

    /// Re-query a provider's model catalog.
    pub async fn refresh_models(&self, kind: ProviderKind) -> Vec<ModelDescriptor> {
        self.provider(kind).refresh_models().await
    }

    fn persist_config(&self) -> QuillResult<()> {
        if let Some(path) = &self.config_path {
            self.config.read().save(path)?;
        }
        Ok(())
    }

    // ---- sessions ----

    pub fn active_session_id(&self) -> Uuid {
        self.sessions.active_id()
    }

    /// Clone of the active session for rendering.
    pub fn active_session(&self) -> Session {
        self.sessions.active_snapshot()
    }

    /// Session listing, most recently modified first.
    pub fn list_sessions(&self) -> Vec<SessionMeta> {
        self.sessions.list()
    }

    /// Save the composer text so it survives session switches and restarts.
    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.sessions.with_active_mut(|session| session.prompt_draft = text);
    }

    /// Save the transcript scroll offset.
    pub fn set_scroll_position(&self, position: f64) {
        self.sessions
            .with_active_mut(|session| session.scroll_position = position);
    }

    /// Create a new session and make it active.
    pub async fn create_session(&self) -> QuillResult<Uuid> {
        self.ensure_idle()?;
        let id = self.sessions.create_session().await?;
        self.publish(Notification::SessionCreated { session_id: id });
        Ok(id)
    }

    /// Switch to another session, persisting the current one first.
    /// Returns `false` when the target's content blob is gone and its
    /// listing entry was dropped.
    pub async fn switch_session(&self, id: Uuid) -> QuillResult<bool> {
        self.ensure_idle()?;
        let switched = self.sessions.switch_session(id).await?;
        if switched {
            self.publish(Notification::SessionSwitched { session_id: id });
        }
        Ok(switched)
    }

    /// Delete a session. Deleting the active one promotes the most
    /// recently modified survivor, or creates a fresh session.
    pub async fn delete_session(&self, id: Uuid) -> QuillResult<()> {
        self.ensure_idle()?;
        self.sessions.delete_session(id).await?;
        self.publish(Notification::SessionDeleted { session_id: id });
        Ok(())
    }

    /// Rename a session in the listing.
    pub async fn rename_session(&self, id: Uuid, name: impl Into<String>) -> QuillResult<()> {
        self.sessions.rename_session(id, name).await
    }

    /// Structural session changes are refused while the active session
    /// has an operation in flight.
    fn ensure_idle(&self) -> QuillResult<()> {
        if let Some(operation) = self.in_flight.lock().get(&self.sessions.active_id()) {
            return Err(QuillError::busy(*operation));
        }
        Ok(())
    }

    fn begin_flight(&self, session_id: Uuid, operation: &'static str) -> QuillResult<FlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock();
        if let Some(current) = in_flight.get(&session_id) {
            return Err(QuillError::busy(*current));
        }
        in_flight.insert(session_id, operation);
        Ok(FlightGuard {
            registry: &self.in_flight,
            session_id,
        })
    }

    // ---- history ----

    /// Attach a file snapshot to the active session. A snapshot of the
    /// same path replaces the earlier one instead of accumulating.
    pub async fn attach_file(
        &self,
        path: impl Into<String>,
        language: impl Into<String>,
        content: impl Into<String>,
    ) -> QuillResult<()> {
        self.append_entry(ConversationEntry::file_context(path, language, content));
        self.sessions.persist_active().await
    }

    /// Record whether a diff block from a model turn has been applied.
    pub async fn set_patch_status(
        &self,
        turn_id: &str,
        key: PatchKey,
        applied: bool,
    ) -> QuillResult<bool> {
        let updated = self
            .sessions
            .with_active_mut(|session| session.history.set_patch_status(turn_id, key, applied));
        if updated {
            self.sessions.persist_active().await?;
        }
        Ok(updated)
    }

    pub fn patch_status(&self, turn_id: &str, key: &PatchKey) -> Option<bool> {
        self.sessions
            .with_active(|session| session.history.patch_status(turn_id, key))
    }

    /// Estimated size of the full history as a percentage of the active
    /// provider's context window; drives the UI meter.
    pub fn context_usage_percent(&self) -> f64 {
        let window = self.active_provider().context_window();
        self.sessions
            .with_active(|session| self.budget.usage_percent(session.history.entries(), window))
    }

    fn append_entry(&self, entry: ConversationEntry) {
        let session_id = self.sessions.active_id();
        self.sessions.with_active_mut(|session| {
            session.history.append(entry.clone());
            session.touch();
        });
        self.publish(Notification::EntryAppended { session_id, entry });
    }

    fn append_notice(&self, message: impl Into<String>) {
        self.append_entry(ConversationEntry::notice(message));
    }

    // ---- generation ----

    /// Send a prompt on the active session and stream the reply into a
    /// pending model turn.
    ///
    /// The full pipeline: staleness reconciliation, dispatch commit,
    /// proactive compression near the window, budget pruning of the wire
    /// copy, then the stream itself. The session is persisted before this
    /// returns, whatever the outcome.
    pub async fn send(&self, prompt: impl Into<String>) -> QuillResult<SendOutcome> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuillError::invalid_input("prompt is empty"));
        }
        let session_id = self.sessions.active_id();
        let _guard = self.begin_flight(session_id, "generation")?;
        let provider = self.active_provider();

        if !provider.is_configured() {
            self.append_notice(format!(
                "{} is not configured; open provider settings before sending",
                provider.kind()
            ));
            self.sessions.persist_active().await?;
            return Ok(SendOutcome::Refused);
        }

        if self.resolve_stale_snapshots().await {
            debug!(session = %session_id, "send cancelled at the stale-snapshot prompt");
            self.sessions.persist_active().await?;
            return Ok(SendOutcome::Cancelled);
        }

        // The dispatch is committed: record the turn and the recall entry,
        // clear the composer.
        self.sessions.with_active_mut(|session| {
            session.push_prompt(&prompt);
            session.prompt_draft.clear();
        });
        self.append_entry(ConversationEntry::user(prompt));

        // Compress before sending when the full history nears the window.
        let window = provider.context_window();
        let threshold = f64::from(self.config.read().summarize_threshold_percent);
        let usage = self
            .sessions
            .with_active(|session| self.budget.usage_percent(session.history.entries(), window));
        if usage >= threshold {
            info!(usage, threshold, "history near the context window, compressing");
            self.summarize_locked(session_id, provider.as_ref()).await;
        }

        // Budget a wire copy; the canonical log is never pruned here.
        let entries = self
            .sessions
            .with_active(|session| session.history.entries().to_vec());
        let prepared = self.budget.prepare_for_send(&entries, window);
        if !prepared.dropped_files.is_empty() {
            self.append_notice(format!(
                "Dropped attached files to fit the context window: {}",
                prepared.dropped_files.join(", ")
            ));
        }
        if prepared.dropped_turns > 0 || !prepared.dropped_files.is_empty() {
            self.publish(Notification::HistoryPruned {
                session_id,
                dropped_turns: prepared.dropped_turns,
                dropped_files: prepared.dropped_files.clone(),
            });
        }

        let settings = provider.settings();
        let pending_id = self
            .sessions
            .with_active_mut(|session| session.history.begin_pending_model());
        self.publish(Notification::StreamStarted {
            session_id,
            provider: provider.kind(),
        });

        let outcome = match provider.chat(&prepared.entries, settings.system_prompt()).await {
            Ok(stream) => self.consume_stream(session_id, &pending_id, stream).await,
            Err(e) => {
                self.abort_pending(session_id, &pending_id, &e);
                SendOutcome::Failed
            }
        };

        self.sessions.persist_active().await?;
        Ok(outcome)
    }

    async fn consume_stream(
        &self,
        session_id: Uuid,
        pending_id: &str,
        mut stream: ChatStream,
    ) -> SendOutcome {
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Update { text } => {
                    self.sessions
                        .with_active_mut(|session| session.history.update_pending(pending_id, &text));
                    self.publish(Notification::StreamUpdate { session_id, text });
                }
                StreamEvent::Done {
                    text,
                    context_ratio_percent,
                } => {
                    self.sessions.with_active_mut(|session| {
                        session.history.complete_pending(pending_id, &text);
                        session.touch();
                    });
                    self.publish(Notification::StreamFinished {
                        session_id,
                        context_ratio_percent,
                    });
                    return SendOutcome::Completed;
                }
                StreamEvent::Failed(e) => {
                    self.abort_pending(session_id, pending_id, &e);
                    return SendOutcome::Failed;
                }
            }
        }
        // Adapters always close with a terminal event; a bare end means
        // the transport glue broke.
        let e = QuillError::http("stream ended without a terminal event");
        self.abort_pending(session_id, pending_id, &e);
        SendOutcome::Failed
    }

    /// Drop the pending turn, discarding its partial text, and log the
    /// failure in the conversation.
    fn abort_pending(&self, session_id: Uuid, pending_id: &str, error: &QuillError) {
        self.sessions.with_active_mut(|session| {
            session.history.remove_entry(pending_id);
        });
        let message = format!("Generation failed: {error}");
        warn!(session = %session_id, %error, "generation failed");
        self.append_entry(ConversationEntry::error(message.clone()));
        self.publish(Notification::GenerationFailed { session_id, message });
    }

    /// Walk attached snapshots and reconcile any that no longer match the
    /// live file. Returns `true` when the user cancelled the send.
    async fn resolve_stale_snapshots(&self) -> bool {
        let (Some(source), Some(prompter)) = (&self.file_source, &self.stale_prompt) else {
            return false;
        };
        let snapshots: Vec<(String, String, String)> = self.sessions.with_active(|session| {
            session
                .history
                .entries()
                .iter()
                .filter_map(|entry| match entry {
                    ConversationEntry::FileContext {
                        id,
                        language,
                        content,
                        ..
                    } => Some((id.clone(), language.clone(), content.clone())),
                    _ => None,
                })
                .collect()
        });

        for (path, language, snapshot) in snapshots {
            let Some(live) = source.read(&path).await else {
                // Deleted on disk; nothing to offer an update from.
                continue;
            };
            if live == snapshot {
                continue;
            }
            let message = format!(
                "{path} has changed since it was attached. Update the snapshot before sending?"
            );
            match prompter.confirm(&message).await {
                StaleResolution::Update => {
                    debug!(file = %path, "refreshing stale snapshot");
                    self.append_entry(ConversationEntry::file_context(path, language, live));
                }
                StaleResolution::Keep => {}
                StaleResolution::Cancel => return true,
            }
        }
        false
    }

    // ---- summarization ----

    /// Compress older conversation into a single summary turn.
    ///
    /// Returns `Ok(true)` when the history was compressed. A history too
    /// short to compress is a quiet no-op; a failed summarization request
    /// appends a notice and leaves the history intact.
    pub async fn summarize(&self) -> QuillResult<bool> {
        let session_id = self.sessions.active_id();
        let _guard = self.begin_flight(session_id, "summarization")?;
        let provider = self.active_provider();
        if !provider.is_configured() {
            self.append_notice(format!(
                "{} is not configured; open provider settings before summarizing",
                provider.kind()
            ));
            self.sessions.persist_active().await?;
            return Ok(false);
        }
        let compressed = self.summarize_locked(session_id, provider.as_ref()).await;
        self.sessions.persist_active().await?;
        Ok(compressed)
    }

    /// Summarization body; the caller holds the flight guard and persists.
    async fn summarize_locked(&self, session_id: Uuid, provider: &dyn Provider) -> bool {
        let entries = self
            .sessions
            .with_active(|session| session.history.entries().to_vec());
        let policy = SummaryPolicy::new(self.config.read().summary_target_percent);
        let Some(plan) = policy.plan(&entries) else {
            debug!(session = %session_id, "history too short to compress");
            return false;
        };

        self.publish(Notification::SummarizeStarted { session_id });
        let request = vec![ConversationEntry::user(summary_prompt(&plan.eligible))];
        let result = match provider.chat(&request, None).await {
            Ok(stream) => collect_final(stream).await,
            Err(e) => Err(e),
        };
        let summary_text = match result {
            Ok((text, _)) => text,
            Err(e) => {
                let message = format!("Summarization failed: {e}");
                warn!(session = %session_id, "{message}");
                self.append_notice(message.clone());
                self.publish(Notification::SummarizeFailed { session_id, message });
                return false;
            }
        };

        let replaced = &entries[plan.start..plan.start + plan.count];
        let (replacements, tokens_before, tokens_after) =
            replacement_entries(&summary_text, replaced, &self.estimator);

        // The planned indices may be stale by now: an attach can replace an
        // earlier snapshot while the request is in flight, shifting every
        // later entry. Find the block again before splicing.
        let spliced = self.sessions.with_active_mut(|session| {
            locate_planned_block(session.history.entries(), replaced).map(|start| {
                let result = session.history.splice(start, replaced.len(), replacements);
                if result.is_ok() {
                    session.touch();
                }
                result
            })
        });
        match spliced {
            Some(Ok(_)) => {
                info!(
                    session = %session_id,
                    tokens_before, tokens_after, "compressed history into a summary turn"
                );
                self.publish(Notification::SummarizeFinished {
                    session_id,
                    tokens_before,
                    tokens_after,
                });
                true
            }
            Some(Err(e)) => {
                let message = format!("Summarization failed: {e}");
                warn!(session = %session_id, "{message}");
                self.append_notice(message.clone());
                self.publish(Notification::SummarizeFailed { session_id, message });
                false
            }
            None => {
                let message = String::from(
                    "Summarization skipped: the conversation changed while the request was in flight",
                );
                warn!(session = %session_id, "{message}");
                self.append_notice(message.clone());
                self.publish(Notification::SummarizeFailed { session_id, message });
                false
            }
        }
    }
}

/// Re-locate a block of entries inside the current history.
///
/// Id-bearing entries match by id; notices carry no id and must match
/// exactly. Returns the block's start index, or `None` when the block no
/// longer exists as a contiguous run.
fn locate_planned_block(
    entries: &[ConversationEntry],
    planned: &[ConversationEntry],
) -> Option<usize> {
    if planned.is_empty() || entries.len() < planned.len() {
        return None;
    }
    entries.windows(planned.len()).position(|window| {
        window
            .iter()
            .zip(planned)
            .all(|(current, original)| match original.id() {
                Some(id) => current.id() == Some(id),
                None => current == original,
            })
    })
}

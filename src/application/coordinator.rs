//! Per-keep coordinator.
//!
//! One coordinator owns a keep from creation (or startup reconciliation)
//! until a confirmed close or termination. It owns the keep's event
//! subscriptions and tears them down in the terminal handler. Errors never
//! escape past this boundary; they are logged and the affected job is
//! abandoned.

use crate::application::node::NodeContext;
use crate::application::recovery;
use crate::domain::{GroupParameters, KeepSigner};
use crate::foundation::{Digest, NodeError, Result};
use crate::infrastructure::chain::confirm::wait_for_confirmation;
use crate::infrastructure::chain::{EventSubscription, KeepClosedEvent, KeepHandle, KeepTerminatedEvent};
use crate::infrastructure::retry::run_with_retry;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub struct KeepCoordinator {
    ctx: Arc<NodeContext>,
    keep: Arc<dyn KeepHandle>,
}

impl KeepCoordinator {
    pub fn new(ctx: Arc<NodeContext>, keep: Arc<dyn KeepHandle>) -> Arc<Self> {
        Arc::new(Self { ctx, keep })
    }

    /// Full path for a keep without an on-chain key yet: validate the group,
    /// run key generation once, persist the signer, submit the public key,
    /// then monitor. A failed generation abandons the keep in-process; the
    /// underlying protocol is stateful across peers, so a second run would
    /// diverge from their session.
    pub async fn generate_key_and_monitor(self: Arc<Self>, group: GroupParameters) {
        let keep_id = self.keep.id();

        if let Err(err) = group.validate() {
            error!("refusing keep={keep_id}: {err}");
            return;
        }

        if !self.ctx.dedup.notify_keygen_started(&keep_id).await {
            info!("key generation request for keep={keep_id} already handled");
            return;
        }
        let generated = self.generate_key(&group).await;
        self.ctx.dedup.notify_keygen_completed(&keep_id).await;

        let signer = match generated {
            Ok(signer) => signer,
            Err(err) => {
                error!("failed to generate signer for keep={keep_id} error={err}");
                return;
            }
        };
        info!("initialized signer for keep={keep_id}");

        if let Err(err) = Arc::clone(&self).monitor(signer).await {
            error!("failed registering for events of keep={keep_id} error={err}");
        }
    }

    async fn generate_key(&self, group: &GroupParameters) -> Result<KeepSigner> {
        let keep_id = self.keep.id();
        info!(
            "member={} is starting signer generation for keep={keep_id}",
            self.ctx.operator.address
        );

        let deadline = self.ctx.config.key_generation_timeout();
        let signer = timeout(deadline, self.ctx.tss.generate_signer(&keep_id, group))
            .await
            .map_err(|_| NodeError::Timeout { operation: "key generation".to_string(), seconds: deadline.as_secs() })??;

        // Persisting strictly precedes the on-chain submission; a crash in
        // between must never lose key material the chain may reference.
        self.ctx.registry.register(signer.clone())?;

        {
            let _submission = self.ctx.submission_lock.lock().await;
            if let Err(err) = self.keep.submit_public_key(&signer.group_public_key).await {
                // Another member may have won the submission race; the chain
                // resolves conflicts, we keep operating with our material.
                warn!("public key submission failed for keep={keep_id} error={err}");
            }
        }

        Ok(signer)
    }

    /// Subscribes to the keep's signature, closed and terminated events and
    /// drives them until a terminal event fires. Also probes for a signature
    /// request whose notification was missed while this node was offline.
    pub async fn monitor(self: Arc<Self>, signer: KeepSigner) -> Result<()> {
        let mut signature_events = self.keep.on_signature_requested().await?;
        let closed_events = self.keep.on_keep_closed().await?;
        let terminated_events = self.keep.on_keep_terminated().await?;

        let keep_scope = self.ctx.shutdown.child_token();

        {
            let this = Arc::clone(&self);
            let probe_signer = signer.clone();
            tokio::spawn(async move {
                this.check_awaiting_signature(&probe_signer).await;
            });
        }

        {
            let this = Arc::clone(&self);
            let signer = signer.clone();
            let scope = keep_scope.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = scope.cancelled() => break,
                        event = signature_events.next() => {
                            let Some(event) = event else { break };
                            info!(
                                "new signature requested from keep={} for digest={} at block={}",
                                this.keep.id(),
                                event.digest,
                                event.block_number
                            );
                            let handler = Arc::clone(&this);
                            let signer = signer.clone();
                            let job_scope = scope.clone();
                            tokio::spawn(async move {
                                tokio::select! {
                                    _ = job_scope.cancelled() => {}
                                    result = handler.handle_signature_request(&signer, event.digest, event.block_number) => {
                                        if let Err(err) = result {
                                            error!(
                                                "failed to generate a signature keep={} digest={} error={err}",
                                                handler.keep.id(),
                                                event.digest
                                            );
                                        }
                                    }
                                }
                            });
                        }
                    }
                }
                signature_events.unsubscribe();
            });
        }

        {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.watch_terminal_events(signer, closed_events, terminated_events, keep_scope).await;
            });
        }

        Ok(())
    }

    /// Catches a request that fired while this node was offline: the latest
    /// digest still awaiting a signature goes through the same pipeline as a
    /// live event.
    async fn check_awaiting_signature(&self, signer: &KeepSigner) {
        let keep_id = self.keep.id();
        debug!("checking awaiting signature for keep={keep_id}");

        let digest = match self.keep.latest_digest().await {
            Ok(Some(digest)) => digest,
            Ok(None) => return,
            Err(err) => {
                error!("could not get latest digest for keep={keep_id} error={err}");
                return;
            }
        };
        match self.keep.is_awaiting_signature(&digest).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                error!("could not check awaiting signature of digest={digest} for keep={keep_id} error={err}");
                return;
            }
        }

        info!("awaiting a signature from keep={keep_id} for digest={digest}");
        let start_block = match self.keep.signature_requested_block(&digest).await {
            Ok(block) => block,
            Err(err) => {
                error!("failed to get signature request block for keep={keep_id} digest={digest} error={err}");
                return;
            }
        };
        if let Err(err) = self.handle_signature_request(signer, digest, start_block).await {
            error!("failed to generate a signature keep={keep_id} digest={digest} error={err}");
        }
    }

    /// The signature pipeline: deduplicate, confirm past the reorg horizon,
    /// sign, submit. The whole pipeline is retried with backoff until the
    /// signing deadline; distinct digests run concurrently while duplicates
    /// of the same digest collapse into one job.
    pub async fn handle_signature_request(&self, signer: &KeepSigner, digest: Digest, start_block: u64) -> Result<()> {
        run_with_retry(self.ctx.config.signing_timeout(), || async move {
            let should_handle = self.ctx.dedup.notify_signing_started(self.keep.as_ref(), &digest).await?;
            if !should_handle {
                info!(
                    "signing request for keep={} and digest={digest} already handled",
                    self.keep.id()
                );
                return Ok(());
            }

            let result = self.confirm_and_sign(signer, &digest, start_block).await;
            self.ctx.dedup.notify_signing_completed(&self.keep.id(), &digest).await;
            result
        })
        .await
    }

    async fn confirm_and_sign(&self, signer: &KeepSigner, digest: &Digest, start_block: u64) -> Result<()> {
        let keep_id = self.keep.id();

        let keep = Arc::clone(&self.keep);
        let digest_copy = *digest;
        let awaiting = wait_for_confirmation(self.ctx.chain.as_ref(), start_block, move || {
            let keep = Arc::clone(&keep);
            async move { keep.is_awaiting_signature(&digest_copy).await }
        })
        .await?;

        if !awaiting {
            // Deeper chain reorg; the request no longer exists.
            warn!("keep={keep_id} is not awaiting a signature for digest={digest}");
            return Ok(());
        }

        let signature = self.ctx.tss.sign(signer, digest).await?;

        {
            let _submission = self.ctx.submission_lock.lock().await;
            self.keep.submit_signature(&signature).await?;
        }
        info!("signature submitted for keep={keep_id} digest={digest}");
        Ok(())
    }

    async fn watch_terminal_events(
        self: Arc<Self>,
        signer: KeepSigner,
        mut closed_events: EventSubscription<KeepClosedEvent>,
        mut terminated_events: EventSubscription<KeepTerminatedEvent>,
        keep_scope: CancellationToken,
    ) {
        let keep_id = self.keep.id();
        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                event = closed_events.next() => {
                    let Some(event) = event else { break };
                    info!("keep={keep_id} closed event received at block={}", event.block_number);
                    match self.handle_closed(event.block_number).await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(err) => error!("failed to handle closed event for keep={keep_id} error={err}"),
                    }
                }
                event = terminated_events.next() => {
                    let Some(event) = event else { break };
                    warn!("keep={keep_id} terminated event received at block={}", event.block_number);
                    match self.handle_terminated(&signer, event.block_number).await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(err) => error!("failed to handle terminated event for keep={keep_id} error={err}"),
                    }
                }
            }
        }
        info!("unsubscribing from events on keep={keep_id}");
        closed_events.unsubscribe();
        terminated_events.unsubscribe();
        keep_scope.cancel();
    }

    /// Returns `Ok(true)` when the close was confirmed and the keep
    /// archived, ending the coordinator.
    async fn handle_closed(&self, block_number: u64) -> Result<bool> {
        let keep_id = self.keep.id();
        if !self.ctx.dedup.notify_closing_started(&keep_id).await {
            info!("close event for keep={keep_id} already handled");
            return Ok(false);
        }

        let result = async {
            if self.confirmed_still_active(block_number).await? {
                warn!("keep={keep_id} has not been closed");
                return Ok(false);
            }
            self.ctx.registry.unregister(&keep_id)?;
            info!("keep={keep_id} archived after confirmed close");
            Ok(true)
        }
        .await;

        self.ctx.dedup.notify_closing_completed(&keep_id).await;
        result
    }

    /// As `handle_closed`, but runs liquidation recovery first. Recovery is
    /// best-effort: whatever happens, the keep is unregistered afterwards.
    async fn handle_terminated(&self, signer: &KeepSigner, block_number: u64) -> Result<bool> {
        let keep_id = self.keep.id();
        if !self.ctx.dedup.notify_terminating_started(&keep_id).await {
            info!("terminate event for keep={keep_id} already handled");
            return Ok(false);
        }

        let result = async {
            if self.confirmed_still_active(block_number).await? {
                warn!("keep={keep_id} has not been terminated");
                return Ok(false);
            }

            if let Err(err) = self.run_recovery(signer).await {
                error!("liquidation recovery failed for keep={keep_id} error={err}");
            }

            self.ctx.registry.unregister(&keep_id)?;
            info!("keep={keep_id} archived after confirmed termination");
            Ok(true)
        }
        .await;

        self.ctx.dedup.notify_terminating_completed(&keep_id).await;
        result
    }

    async fn confirmed_still_active(&self, block_number: u64) -> Result<bool> {
        let keep = Arc::clone(&self.keep);
        wait_for_confirmation(self.ctx.chain.as_ref(), block_number, move || {
            let keep = Arc::clone(&keep);
            async move { keep.is_active().await }
        })
        .await
    }

    async fn run_recovery(&self, signer: &KeepSigner) -> Result<()> {
        let tbtc = self
            .ctx
            .tbtc
            .as_ref()
            .ok_or_else(|| NodeError::protocol("liquidation recovery", "no sanctioned application handle"))?;
        recovery::run_liquidation_recovery(
            self.ctx.chain.as_ref(),
            self.keep.as_ref(),
            signer,
            self.ctx.tss.as_ref(),
            self.ctx.broadcast.as_ref(),
            tbtc.as_ref(),
            &self.ctx.operator,
            &self.ctx.config,
        )
        .await
        .map(|_| ())
    }
}

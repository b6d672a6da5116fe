//! Process-wide orchestrator.
//!
//! Wires collaborators together, reconciles in-flight keeps from storage,
//! scans for keeps still awaiting key generation, and watches the factory
//! for newly created keeps. Lifecycle-scoped singletons (the submission
//! lock, the pre-params pool behind the engine, the shutdown token) live
//! here rather than as ambient globals.

use crate::application::coordinator::KeepCoordinator;
use crate::application::dedup::EventDeduplicator;
use crate::domain::GroupParameters;
use crate::foundation::{now_secs, KeepId, OperatorIdentity, Result};
use crate::infrastructure::chain::confirm::wait_for_confirmation;
use crate::infrastructure::chain::{HostChain, KeepHandle, TbtcApplication};
use crate::infrastructure::config::NodeConfig;
use crate::infrastructure::persistence::Persistence;
use crate::infrastructure::registry::KeepsRegistry;
use crate::infrastructure::transport::BroadcastNetwork;
use crate::infrastructure::tss::TssEngine;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Everything a coordinator needs, shared across all keeps of this node.
pub struct NodeContext {
    pub chain: Arc<dyn HostChain>,
    pub tss: Arc<dyn TssEngine>,
    pub broadcast: Arc<dyn BroadcastNetwork>,
    pub tbtc: Option<Arc<dyn TbtcApplication>>,
    pub registry: Arc<KeepsRegistry>,
    pub dedup: Arc<EventDeduplicator>,
    pub config: Arc<NodeConfig>,
    pub operator: OperatorIdentity,
    /// Host-chain writes need monotonically increasing nonces; this lock
    /// serializes every submission across the whole process.
    pub submission_lock: Arc<Mutex<()>>,
    pub shutdown: CancellationToken,
}

pub struct NodeController {
    ctx: Arc<NodeContext>,
}

impl NodeController {
    #[allow(clippy::too_many_arguments)]
    pub async fn initialize(
        config: NodeConfig,
        operator: OperatorIdentity,
        chain: Arc<dyn HostChain>,
        tss: Arc<dyn TssEngine>,
        broadcast: Arc<dyn BroadcastNetwork>,
        tbtc: Option<Arc<dyn TbtcApplication>>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self> {
        info!("initializing keep client operator={}", operator.address);

        let registry = Arc::new(KeepsRegistry::new(persistence));
        registry.load_existing()?;

        tss.init_pre_params_pool().await?;

        let dedup = Arc::new(EventDeduplicator::new(Arc::clone(&registry), config.signing_event_check_timeout()));
        let ctx = Arc::new(NodeContext {
            chain,
            tss,
            broadcast,
            tbtc,
            registry,
            dedup,
            config: Arc::new(config),
            operator,
            submission_lock: Arc::new(Mutex::new(())),
            shutdown: CancellationToken::new(),
        });
        Ok(Self { ctx })
    }

    pub fn context(&self) -> Arc<NodeContext> {
        Arc::clone(&self.ctx)
    }

    pub fn pre_params_pool_size(&self) -> usize {
        self.ctx.tss.pre_params_pool_size()
    }

    /// Propagates to every in-flight operation of every coordinator.
    pub fn shutdown(&self) {
        self.ctx.shutdown.cancel();
    }

    /// Starts all background activity. Returns after subscriptions are in
    /// place; the spawned tasks run until shutdown.
    pub async fn run(&self) -> Result<()> {
        self.register_for_application();

        for keep_id in self.ctx.registry.keep_ids() {
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                reconcile_keep(ctx, keep_id).await;
            });
        }

        {
            let ctx = Arc::clone(&self.ctx);
            tokio::spawn(async move {
                check_awaiting_key_generation(ctx).await;
            });
        }

        let mut created_events = self.ctx.chain.on_keep_created().await?;
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    event = created_events.next() => {
                        let Some(event) = event else { break };
                        info!(
                            "new keep={} created with {} members at block={}",
                            event.keep_id,
                            event.members.len(),
                            event.block_number
                        );
                        if !event.is_member(&ctx.chain.operator_address()) {
                            info!("not a signing group member in keep={}, skipping", event.keep_id);
                            continue;
                        }
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            match ctx.chain.keep(&event.keep_id).await {
                                Ok(keep) => {
                                    let coordinator = KeepCoordinator::new(Arc::clone(&ctx), keep);
                                    coordinator
                                        .generate_key_and_monitor(GroupParameters::new(
                                            event.members,
                                            event.honest_threshold,
                                        ))
                                        .await;
                                }
                                Err(err) => {
                                    error!("failed to resolve keep={} for created event error={err}", event.keep_id);
                                }
                            }
                        });
                    }
                }
            }
            created_events.unsubscribe();
        });

        Ok(())
    }

    /// One-shot candidate registration against the sanctioned application;
    /// failure is logged but never fatal.
    fn register_for_application(&self) {
        match self.ctx.tbtc.clone() {
            Some(tbtc) => {
                tokio::spawn(async move {
                    match tbtc.register_as_member_candidate().await {
                        Ok(()) => info!("registered as a member candidate for the sanctioned application"),
                        Err(err) => error!("failed to register as a member candidate error={err}"),
                    }
                });
            }
            None => {
                error!(
                    "no sanctioned application handle available; this client WILL NOT ATTEMPT TO OPERATE on the tBTC system"
                );
            }
        }
    }
}

/// Startup reconciliation for one persisted keep: archive it if the chain
/// confirms it inactive, otherwise resubscribe and probe for a signature
/// request missed while offline.
async fn reconcile_keep(ctx: Arc<NodeContext>, keep_id: KeepId) {
    let keep = match ctx.chain.keep(&keep_id).await {
        Ok(keep) => keep,
        Err(err) => {
            error!(
                "failed to look up keep={keep_id} for active check error={err}; \
                 subscriptions for keep signing and closing events are skipped"
            );
            return;
        }
    };

    let active = match keep.is_active().await {
        Ok(active) => active,
        Err(err) => {
            error!(
                "failed to verify if keep={keep_id} is still active error={err}; \
                 subscriptions for keep signing and closing events are skipped"
            );
            return;
        }
    };

    if !active {
        info!("keep={keep_id} seems no longer active; confirming");
        match confirm_inactive(&ctx, &keep).await {
            Ok(true) => {
                info!("confirmed that keep={keep_id} is no longer active; archiving");
                if let Err(err) = ctx.registry.unregister(&keep_id) {
                    error!("failed to unregister keep={keep_id} error={err}");
                }
                return;
            }
            Ok(false) => warn!("keep={keep_id} is still active"),
            Err(err) => {
                error!("failed to confirm that keep={keep_id} is inactive error={err}");
                return;
            }
        }
    }

    // Conservative branch for an ambiguous state: local material with no
    // on-chain key means a submission is either in flight or conflicted.
    match keep.public_key().await {
        Ok(Some(_)) => {}
        Ok(None) => error!(
            "keep={keep_id} is active but no public key is registered on-chain while key material is stored on disk; \
             PLEASE INSPECT THE PUBLIC KEY SUBMISSION TRANSACTION FOR THIS KEEP"
        ),
        Err(err) => warn!("could not read the public key of keep={keep_id} error={err}"),
    }

    let signer = match ctx.registry.get_signer(&keep_id) {
        Ok(signer) => signer,
        Err(err) => {
            error!("no signer for keep={keep_id} error={err}");
            return;
        }
    };

    let coordinator = KeepCoordinator::new(ctx, keep);
    if let Err(err) = coordinator.monitor(signer).await {
        error!("failed registering for events of keep={keep_id} error={err}");
    }
}

async fn confirm_inactive(ctx: &Arc<NodeContext>, keep: &Arc<dyn KeepHandle>) -> Result<bool> {
    let current_block = ctx.chain.current_block().await?;
    let keep = Arc::clone(keep);
    let active = wait_for_confirmation(ctx.chain.as_ref(), current_block, move || {
        let keep = Arc::clone(&keep);
        async move { keep.is_active().await }
    })
    .await?;
    Ok(!active)
}

/// Walks keeps newest to oldest, stopping at the first opened before the
/// lookback window, and starts key generation for any keep this node is a
/// member of that has neither an on-chain key nor local signer material.
async fn check_awaiting_key_generation(ctx: Arc<NodeContext>) {
    let keep_count = match ctx.chain.keep_count().await {
        Ok(count) => count,
        Err(err) => {
            warn!("could not get keep count error={err}");
            return;
        }
    };
    let lookback_secs = ctx.config.awaiting_key_generation_lookback().as_secs();

    for index in (0..keep_count).rev() {
        debug!("checking awaiting key generation for keep at index={index}");

        let keep = match ctx.chain.keep_at_index(index).await {
            Ok(keep) => keep,
            Err(err) => {
                warn!("could not get keep at index={index} error={err}");
                continue;
            }
        };
        let opened_at = match keep.opened_at().await {
            Ok(opened_at) => opened_at,
            Err(err) => {
                warn!("could not check opening timestamp for keep={} error={err}", keep.id());
                continue;
            }
        };

        // Keeps are ordered by creation; everything before this one is older.
        if opened_at.saturating_add(lookback_secs) < now_secs() {
            debug!("stopping awaiting key generation check with keep at index={index} opened at {opened_at}");
            break;
        }

        if let Err(err) = check_keep_awaiting_key_generation(&ctx, keep).await {
            warn!("could not check awaiting key generation for keep at index={index} error={err}");
        }
    }
}

async fn check_keep_awaiting_key_generation(ctx: &Arc<NodeContext>, keep: Arc<dyn KeepHandle>) -> Result<()> {
    let keep_id = keep.id();

    if keep.public_key().await?.is_some() {
        return Ok(());
    }

    // Key material on disk means a previous generation succeeded and the
    // submission is either still mining or conflicted; never run again.
    if ctx.registry.has_signer(&keep_id) {
        warn!(
            "keep={keep_id} public key is not registered on-chain but key material is stored on disk; \
             skipping key generation; PLEASE INSPECT THE PUBLIC KEY SUBMISSION TRANSACTION FOR THIS KEEP"
        );
        return Ok(());
    }

    let members = keep.members().await?;
    if !members.contains(&ctx.chain.operator_address()) {
        return Ok(());
    }
    let honest_threshold = keep.honest_threshold().await?;

    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        let coordinator = KeepCoordinator::new(ctx, keep);
        coordinator.generate_key_and_monitor(GroupParameters::new(members, honest_threshold)).await;
    });
    Ok(())
}

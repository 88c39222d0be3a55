//! HA-pair sequencing: the passive member upgrades first, roles are
//! re-read, then the remaining member follows. Roles are never
//! remembered across the first upgrade because failover may have moved
//! them.

use crate::{
    common::error::{DeviceApi as DeviceApiCtx, HaAmbiguous, Result},
    daemon::DaemonContext,
    device_api::HaState,
    job::Job,
    status::device::{DeviceStatus, UpgradeStatus},
    upgrade::engine::{self, DeviceOutcome},
};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of a whole pair, reduced from its two member workflows.
pub struct PairOutcome {
    pub passive: DeviceOutcome,
    pub active: Option<DeviceOutcome>,
}

impl PairOutcome {
    pub fn is_success(&self) -> bool {
        self.passive.is_success() && self.active.map(|o| o.is_success()).unwrap_or(false)
    }

    pub fn was_cancelled(&self) -> bool {
        self.passive == DeviceOutcome::Cancelled
            || self.active == Some(DeviceOutcome::Cancelled)
    }
}

/// Drive both members of an HA pair.
pub async fn run_pair(
    ctx: &DaemonContext,
    job: &Job,
    cancel: &CancellationToken,
) -> PairOutcome {
    let serial_a = job.devices[0].clone();
    let serial_b = job.devices[1].clone();

    let (passive, active) = match resolve_roles(ctx, &serial_a, &serial_b).await {
        Ok(roles) => roles,
        Err(error) => {
            warn!(
                pair = %job.ha_pair_name,
                %error,
                "HA roles could not be resolved; failing the pair"
            );
            for serial in [&serial_a, &serial_b] {
                fail_at_planning(ctx, serial, &error.to_string());
            }
            return PairOutcome {
                passive: DeviceOutcome::Failed,
                active: None,
            };
        }
    };

    info!(
        pair = %job.ha_pair_name,
        passive = %passive,
        active = %active,
        "Upgrading HA pair, passive member first"
    );
    let passive_outcome =
        engine::run_device(ctx, job, &passive, Some(HaState::Passive), cancel).await;
    if !passive_outcome.is_success() {
        // The untouched member keeps serving; no rollback is attempted.
        return PairOutcome {
            passive: passive_outcome,
            active: None,
        };
    }

    // Failover may have happened while the passive member rebooted; the
    // remaining member's role is re-read for the record, not guessed.
    let remaining_role = live_role(ctx, &active).await.unwrap_or(HaState::Unknown);
    info!(
        pair = %job.ha_pair_name,
        device = %active,
        role = %remaining_role,
        "Upgrading remaining HA member"
    );
    let active_outcome =
        engine::run_device(ctx, job, &active, Some(remaining_role), cancel).await;

    PairOutcome {
        passive: passive_outcome,
        active: Some(active_outcome),
    }
}

/// Read both live roles and decide who goes first. Two identical roles,
/// or any unknown, fail the job: guessing could reboot the serving
/// member.
async fn resolve_roles(
    ctx: &DaemonContext,
    serial_a: &str,
    serial_b: &str,
) -> Result<(String, String)> {
    let state_a = live_role(ctx, serial_a).await?;
    let state_b = live_role(ctx, serial_b).await?;

    match (state_a, state_b) {
        (HaState::Passive, HaState::Active) => {
            Ok((serial_a.to_string(), serial_b.to_string()))
        }
        (HaState::Active, HaState::Passive) => {
            Ok((serial_b.to_string(), serial_a.to_string()))
        }
        _ => HaAmbiguous {
            serial_a,
            serial_b,
            state_a: state_a.to_string(),
            state_b: state_b.to_string(),
        }
        .fail(),
    }
}

async fn live_role(ctx: &DaemonContext, serial: &str) -> Result<HaState> {
    let device = ctx.inventory.require(serial)?;
    let api = ctx
        .connector
        .connect(device)
        .context(DeviceApiCtx { serial })?;
    api.ha_state().await.context(DeviceApiCtx { serial })
}

fn fail_at_planning(ctx: &DaemonContext, serial: &str, message: &str) {
    let mut status = match ctx.statuses.load(serial) {
        Ok(Some(status)) if !status.upgrade_status.is_terminal() => status,
        Ok(Some(_)) | Ok(None) | Err(_) => DeviceStatus::new(serial, ""),
    };
    status.upgrade_status = UpgradeStatus::Failed;
    status.current_phase = "planning".to_string();
    status.upgrade_message = message.to_string();
    status.record_error("planning", message, "");
    let _ = ctx.statuses.save(&mut status);
}

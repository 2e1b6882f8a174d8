// ── Power and guest-state controller ──
//
// Power transitions are tasks, but "the VM is usable again" is not: it is
// inferred from VMware Tools and guest state, which the control plane
// reports late, and sometimes never updates on a given VM object at all.
// The loops below bound every wait and periodically swap the VM handle
// for a fresh one looked up by UUID.

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use vmsteward_api::{EntityRef, GuestState, PowerState, ToolsRunningStatus};

use crate::config::PollingConfig;
use crate::connection::Connection;
use crate::error::CoreError;
use crate::task::expect_task;

/// Drives power operations on one VM.
///
/// The controller owns its VM handle: when a poll loop refreshes the
/// handle by UUID, every later poll and action uses the refreshed one.
pub struct PowerController<'c> {
    conn: &'c Connection,
    vm: EntityRef,
}

impl<'c> PowerController<'c> {
    pub fn new(conn: &'c Connection, vm: EntityRef) -> Self {
        Self { conn, vm }
    }

    /// The current VM handle, possibly refreshed since construction.
    pub fn vm(&self) -> &EntityRef {
        &self.vm
    }

    fn polling(&self) -> &PollingConfig {
        &self.conn.polling
    }

    // ── Observed state ───────────────────────────────────────────────

    pub async fn power_state(&self) -> Result<PowerState, CoreError> {
        let vm = &self.vm;
        Ok(self.conn.call(|p| async move { p.power_state(vm).await }).await?)
    }

    pub async fn tools_status(&self) -> Result<ToolsRunningStatus, CoreError> {
        let vm = &self.vm;
        Ok(self
            .conn
            .call(|p| async move { p.tools_running_status(vm).await })
            .await?)
    }

    pub async fn guest_state(&self) -> Result<GuestState, CoreError> {
        let vm = &self.vm;
        Ok(self.conn.call(|p| async move { p.guest_state(vm).await }).await?)
    }

    /// Swap the VM handle for a fresh one found by UUID.
    async fn refresh_handle(&mut self) -> Result<(), CoreError> {
        let vm = &self.vm;
        let uuid = self.conn.call(|p| async move { p.vm_uuid(vm).await }).await?;
        let found = self.conn.resolve_by_uuid(&uuid).await?;
        info!(old = %self.vm, new = %found.entity, "refreshed VM object from vCenter");
        self.vm = found.entity;
        Ok(())
    }

    // ── Power on / off ───────────────────────────────────────────────

    /// Power on, then wait for VMware Tools to come up.
    pub async fn power_on(&mut self) -> Result<(), CoreError> {
        info!(vm = %self.vm, "powering on");
        let vm = &self.vm;
        let task = self.conn.call(|p| async move { p.power_on(vm).await }).await?;
        expect_task(
            self.conn,
            &task,
            Some(self.polling().power_on_timeout),
            "VMware failed to power on the VM",
        )
        .await?;

        self.wait_for_tools().await
    }

    /// Ask the guest OS to shut down and wait until the VM is off.
    pub async fn power_off_soft(&mut self) -> Result<(), CoreError> {
        info!(vm = %self.vm, "asking guest to shut down");
        let vm = &self.vm;
        let task = self
            .conn
            .call(|p| async move { p.shutdown_guest(vm).await })
            .await?;

        if let Some(task) = task {
            return expect_task(
                self.conn,
                &task,
                Some(self.polling().shutdown_task_timeout),
                "VMware failed to shut down the guest OS",
            )
            .await;
        }

        // No task to follow: watch the power state instead.
        let polling = self.polling().clone();
        sleep(polling.shutdown_settle).await;

        let mut polls = 0;
        let mut refreshes = 0;
        loop {
            let state = self.power_state().await?;
            if state == PowerState::PoweredOff {
                info!(vm = %self.vm, "VM powered off");
                return Ok(());
            }

            sleep(polling.power_off_poll_interval).await;
            polls += 1;
            debug!(vm = %self.vm, %state, polls, "waiting for VM to shut down");

            if polls >= polling.power_off_polls_per_refresh {
                self.refresh_handle().await?;
                refreshes += 1;
                polls = 0;
                // The last window ends the wait; no polls after the final refresh.
                if refreshes >= polling.power_off_refresh_limit {
                    error!(vm = %self.vm, "VM is still powered on and won't shut off");
                    return Err(CoreError::Timeout {
                        operation: format!("Shutting down {}", self.vm),
                        waited: polling.power_off_budget(),
                    });
                }
            }
        }
    }

    /// Cut power at the host.
    pub async fn power_off_hard(&mut self) -> Result<(), CoreError> {
        info!(vm = %self.vm, "hard powering off");
        let vm = &self.vm;
        let task = self.conn.call(|p| async move { p.power_off(vm).await }).await?;
        expect_task(
            self.conn,
            &task,
            Some(self.polling().hard_power_off_timeout),
            "VMware failed to power off the VM",
        )
        .await
    }

    // ── Restart ──────────────────────────────────────────────────────

    /// Reset at the host level.
    pub async fn restart_hard(&mut self) -> Result<(), CoreError> {
        info!(vm = %self.vm, "hard restarting");
        let vm = &self.vm;
        let task = self.conn.call(|p| async move { p.reset(vm).await }).await?;
        expect_task(
            self.conn,
            &task,
            Some(self.polling().hard_restart_timeout),
            "VMware failed to reset the VM",
        )
        .await
    }

    /// Ask the guest to reboot and wait until it is back with tools
    /// running. The whole request-and-verify cycle is retried when
    /// verification fails.
    pub async fn restart_soft(&mut self) -> Result<(), CoreError> {
        let tools = self.tools_status().await?;
        if tools != ToolsRunningStatus::Running {
            let message = format!("Cannot reboot: VM tools are in state: {tools}");
            error!(vm = %self.vm, "{message}");
            return Err(CoreError::bad_state(message));
        }

        let cycles = self.polling().soft_restart_cycles;
        let mut last_error = None;
        for cycle in 1..=cycles {
            self.try_to_soft_restart().await?;

            match self.check_soft_restarted_ok().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(vm = %self.vm, cycle, error = %e, "soft restart not confirmed, retrying");
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.map_or_else(|| "none".to_owned(), |e| e.to_string());
        error!(vm = %self.vm, last_error = %last, "giving up on soft restart");
        Err(CoreError::guest_os(format!(
            "Repeatedly failed to reboot the VM. Last error: {last}"
        )))
    }

    /// Send the reboot request, riding out the transient "Invalid Fault"
    /// system error.
    pub async fn try_to_soft_restart(&mut self) -> Result<(), CoreError> {
        let attempts = self.polling().reboot_attempts;
        let backoff = self.polling().invalid_fault_backoff;

        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(vm = %self.vm, attempt, "issuing reboot command");
            let vm = &self.vm;
            match self.conn.call(|p| async move { p.reboot_guest(vm).await }).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_invalid_fault() && attempt < attempts => {
                    info!(vm = %self.vm, "Invalid Fault encountered, retrying after {backoff:?}");
                    sleep(backoff).await;
                }
                Err(e) => {
                    error!(vm = %self.vm, error = %e, "reboot command rejected");
                    return Err(e.into());
                }
            }
        }
    }

    /// Confirm a reboot actually happened and the guest came back.
    pub async fn check_soft_restarted_ok(&mut self) -> Result<(), CoreError> {
        let polling = self.polling().clone();

        // Tools drop out well before the guest reports anything, so a fast
        // reboot is still visible here.
        let mut rebooting = false;
        for _ in 0..polling.reboot_start_polls {
            if self.tools_status().await? != ToolsRunningStatus::Running {
                rebooting = true;
                break;
            }
            sleep(polling.reboot_poll_interval).await;
        }
        if !rebooting {
            warn!(vm = %self.vm, "VM refused to reboot");
            return Err(CoreError::bad_state("VM refused to reboot"));
        }
        info!(vm = %self.vm, "VM started rebooting");

        let mut polls = 0;
        loop {
            let state = self.guest_state().await?;
            if state == GuestState::Running {
                break;
            }
            if polls >= polling.reboot_finish_polls {
                return Err(CoreError::GuestOsTimeout {
                    message: format!("{} did not finish restarting", self.vm),
                    waited: polling.reboot_finish_budget(),
                });
            }
            debug!(vm = %self.vm, %state, "waiting for VM to finish restarting");
            sleep(polling.reboot_poll_interval).await;
            polls += 1;
        }
        info!(vm = %self.vm, "VM restart finished");

        self.wait_for_tools().await
    }

    /// Poll until VMware Tools report running, refreshing the VM handle
    /// after every full window of polls.
    pub async fn wait_for_tools(&mut self) -> Result<(), CoreError> {
        let polling = self.polling().clone();
        info!(vm = %self.vm, "waiting for VMware Tools");

        let mut polls = 0;
        let mut refreshes = 0;
        loop {
            let status = self.tools_status().await?;
            if status == ToolsRunningStatus::Running {
                info!(vm = %self.vm, "VMware Tools running");
                return Ok(());
            }

            sleep(polling.tools_poll_interval).await;
            polls += 1;
            debug!(vm = %self.vm, %status, polls, "still waiting for tools");

            if polls >= polling.tools_polls_per_refresh {
                self.refresh_handle().await?;
                refreshes += 1;
                polls = 0;
                if refreshes >= polling.tools_refresh_limit {
                    error!(vm = %self.vm, "VMware Tools did not come up");
                    return Err(CoreError::Timeout {
                        operation: format!("Waiting for VMware Tools on {}", self.vm),
                        waited: polling.tools_budget(),
                    });
                }
            }
        }
    }
}

/// `true` if the VM reports powered on.
pub fn is_powered_on(state: &PowerState) -> bool {
    *state == PowerState::PoweredOn
}

/// `true` if the VM reports powered off. Not the negation of
/// [`is_powered_on`]: suspended and unknown states are neither.
pub fn is_powered_off(state: &PowerState) -> bool {
    *state == PowerState::PoweredOff
}

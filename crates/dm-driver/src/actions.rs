//! Waiting for asynchronous provider actions and for the server to run.

use tokio::time::Instant;
use tracing::debug;

use crate::driver::Driver;
use crate::error::{Error, Result, ResultExt};
use crate::lifecycle::MachineState;
use crate::types::{Action, ActionStatus};

fn action_error(action: &Action) -> Error {
    let (code, message) = action
        .error
        .as_ref()
        .map(|e| (e.code.clone(), e.message.clone()))
        .unwrap_or_else(|| ("unknown".into(), "action failed".into()));
    Error::Action {
        id: action.id,
        command: action.command.clone(),
        code,
        message,
    }
}

impl Driver {
    /// Poll `action` until it reaches a terminal status.
    pub(crate) async fn wait_for_action(&mut self, action: &Action) -> Result<()> {
        let api = self.api();
        let mut current = action.clone();
        loop {
            match current.status {
                ActionStatus::Success => {
                    debug!(command = %current.command, action_id = current.id, "finished");
                    return Ok(());
                }
                ActionStatus::Error => return Err(action_error(&current)),
                _ => {
                    debug!(
                        command = %current.command,
                        action_id = current.id,
                        progress = current.progress,
                        "waiting for action"
                    );
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
            current = api
                .action(current.id)
                .await
                .context("could not get action status")?;
        }
    }

    /// Poll all `actions` until each one is terminal. Every failed action is
    /// reported, not only the first.
    pub(crate) async fn wait_for_multiple_actions(&mut self, step: &str, actions: &[Action]) -> Result<()> {
        let api = self.api();
        let mut pending = actions.to_vec();
        let mut errors = Vec::new();

        loop {
            let mut running = Vec::with_capacity(pending.len());
            for action in pending {
                match action.status {
                    ActionStatus::Success => {}
                    ActionStatus::Error => errors.push(action_error(&action)),
                    _ => running.push(action),
                }
            }
            if running.is_empty() {
                break;
            }

            let progress = running.iter().map(|a| a.progress).sum::<i32>() / running.len() as i32;
            debug!(step, progress, pending = running.len(), "waiting for actions");
            tokio::time::sleep(self.config.poll_interval()).await;

            pending = Vec::with_capacity(running.len());
            for action in running {
                pending.push(
                    api.action(action.id)
                        .await
                        .context("could not get action status")?,
                );
            }
        }

        if !errors.is_empty() {
            return Err(Error::Actions {
                step: step.to_string(),
                errors,
            });
        }
        debug!(step, "finished");
        Ok(())
    }

    /// Poll the server state until it is running. Gives up after the
    /// configured timeout, if any.
    pub(crate) async fn wait_for_running_server(&mut self) -> Result<()> {
        let started = Instant::now();
        loop {
            let state = self.state().await.context("could not get state")?;
            if state == MachineState::Running {
                return Ok(());
            }

            if let Some(timeout) = self.config.running_timeout() {
                if started.elapsed() > timeout {
                    return Err(Error::Timeout(timeout));
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}

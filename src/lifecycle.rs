//! Simulation lifecycle: bringing the simulation application up, starting and
//! stopping the simulated network, and waiting for call-state convergence.
//!
//! All observation is by polling `STAT?` and `CALLSTAT?` at a fixed interval
//! under a wall-clock bound. Only these loops retry; raw commands never do.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bts::{BtsNumber, BtsTechnology};
use crate::driver::Md8475a;
use crate::error::{CallboxError, Result};
use crate::transport::Transport;
use crate::wire::{parse_reply, CallState, CallStatus, CampingCell, SimulationAppState};

/// Bounds and intervals for every polling loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Wait for `RUN`, `START` and `STOP` to be acknowledged.
    #[serde(with = "crate::config::seconds")]
    pub app_command_timeout: Duration,
    #[serde(with = "crate::config::seconds")]
    pub launch_timeout: Duration,
    #[serde(with = "crate::config::seconds")]
    pub launch_poll_interval: Duration,
    #[serde(with = "crate::config::seconds")]
    pub start_timeout: Duration,
    #[serde(with = "crate::config::seconds")]
    pub start_poll_interval: Duration,
    #[serde(with = "crate::config::seconds")]
    pub reset_timeout: Duration,
    #[serde(with = "crate::config::seconds")]
    pub reset_poll_interval: Duration,
    #[serde(with = "crate::config::seconds")]
    pub registration_timeout: Duration,
    #[serde(with = "crate::config::seconds")]
    pub registration_poll_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            app_command_timeout: Duration::from_secs(60),
            launch_timeout: Duration::from_secs(90),
            launch_poll_interval: Duration::from_secs(15),
            start_timeout: Duration::from_secs(120),
            start_poll_interval: Duration::from_secs(2),
            reset_timeout: Duration::from_secs(30),
            reset_poll_interval: Duration::from_secs(2),
            registration_timeout: Duration::from_secs(240),
            registration_poll_interval: Duration::from_secs(1),
        }
    }
}

pub(crate) fn check_simulation_model(model: &[BtsTechnology]) -> Result<()> {
    if model.is_empty() || model.len() > BtsNumber::ALL.len() {
        return Err(CallboxError::invalid(format!(
            "simulation model needs 1 to {} basestations, got {}",
            BtsNumber::ALL.len(),
            model.len()
        )));
    }
    Ok(())
}

/// Probes until `probe` returns true or `timeout` has elapsed.
///
/// Returns whether the target was observed. The probe always runs at least once,
/// and once more at the deadline.
fn poll_until(
    timeout: Duration,
    interval: Duration,
    mut probe: impl FnMut() -> Result<bool>,
) -> Result<bool> {
    let start = Instant::now();
    loop {
        if probe()? {
            return Ok(true);
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Ok(false);
        }
        thread::sleep(interval.min(timeout - elapsed));
    }
}

impl<T: Transport> Md8475a<T> {
    /// State of the simulation application (`STAT?`).
    pub fn smartstudio_status(&self) -> Result<SimulationAppState> {
        self.get_setting("STAT")
    }

    /// Voice and packet call states (`CALLSTAT?`).
    pub fn call_status(&self) -> Result<CallStatus> {
        CallStatus::parse(&self.query("CALLSTAT?")?)
    }

    pub fn camping_cell(&self) -> Result<CampingCell> {
        CampingCell::parse(&self.query("CAMPINGCELL?")?)
    }

    /// Brings the simulation application to `NOTRUN`, launching or stopping it as needed.
    pub fn launch(&self) -> Result<()> {
        let config = self.lifecycle_config().clone();
        match self.smartstudio_status()? {
            SimulationAppState::NotRun => {
                debug!("simulation application already idle");
                Ok(())
            }
            SimulationAppState::NotExist => {
                info!("launching simulation application");
                self.command_with_timeout("RUN", config.app_command_timeout)?;
                self.await_app_state(
                    SimulationAppState::NotRun,
                    config.launch_timeout,
                    config.launch_poll_interval,
                )
            }
            SimulationAppState::Running => {
                info!("stopping running simulation");
                self.command_with_timeout("STOP", config.app_command_timeout)?;
                self.await_app_state(
                    SimulationAppState::NotRun,
                    config.launch_timeout,
                    config.launch_poll_interval,
                )
            }
        }
    }

    fn await_app_state(
        &self,
        target: SimulationAppState,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        if poll_until(timeout, interval, || Ok(self.smartstudio_status()? == target))? {
            info!(state = %target, "simulation application ready");
            Ok(())
        } else {
            Err(CallboxError::LifecycleTimeout {
                target: format!("STAT? to report {target}"),
                waited: timeout,
            })
        }
    }

    /// Starts the simulated network and waits until it is armed (voice `POWEROFF`).
    pub fn start_simulation(&self) -> Result<()> {
        let config = self.lifecycle_config().clone();
        info!("starting simulation");
        self.command_with_timeout("START", config.app_command_timeout)?;

        let armed = poll_until(config.start_timeout, config.start_poll_interval, || {
            Ok(self.call_status()?.voice == CallState::PowerOff)
        })?;
        if !armed {
            return Err(CallboxError::LifecycleTimeout {
                target: "voice call state POWEROFF".to_string(),
                waited: config.start_timeout,
            });
        }
        info!("simulation running");
        Ok(())
    }

    /// Stops a running simulation and waits for `NOTRUN`. Fails with
    /// `UnexpectedState` if none is running.
    pub fn stop_simulation(&self) -> Result<()> {
        let state = self.smartstudio_status()?;
        if state != SimulationAppState::Running {
            return Err(CallboxError::UnexpectedState {
                expected: SimulationAppState::Running.to_string(),
                actual: state.to_string(),
            });
        }
        let config = self.lifecycle_config().clone();
        info!("stopping simulation");
        self.command_with_timeout("STOP", config.app_command_timeout)?;
        self.await_app_state(
            SimulationAppState::NotRun,
            config.launch_timeout,
            config.launch_poll_interval,
        )
    }

    /// Assigns a technology to each basestation, BTS1 first.
    pub fn set_simulation_model(&self, model: &[BtsTechnology]) -> Result<()> {
        check_simulation_model(model)?;
        let model = model
            .iter()
            .map(|t| t.as_wire())
            .collect::<Vec<_>>()
            .join(",");
        info!(%model, "setting simulation model");
        self.command(&format!("SIMMODEL {model}"))
    }

    pub fn simulation_model(&self) -> Result<Vec<BtsTechnology>> {
        let reply = self.query("SIMMODEL?")?;
        reply
            .split(',')
            .map(|tech| parse_reply("SIMMODEL?", tech))
            .collect()
    }

    /// Resets the simulation to power-off and waits for the voice state to follow.
    ///
    /// If the state does not settle within the reset timeout this returns `Ok`
    /// anyway; only the warning log records it.
    pub fn set_simulation_state_to_poweroff(&self) -> Result<()> {
        self.command("RESETSIMULATION POWEROFF")?;
        self.settle_call_state(CallState::PowerOff)
    }

    /// Resets the simulation to idle on `bts`. Same give-up behaviour as
    /// [`set_simulation_state_to_poweroff`](Self::set_simulation_state_to_poweroff).
    pub fn set_simulation_state_to_idle(&self, bts: BtsNumber) -> Result<()> {
        self.command(&format!("RESETSIMULATION IDLE,{bts}"))?;
        self.settle_call_state(CallState::Idle)
    }

    fn settle_call_state(&self, target: CallState) -> Result<()> {
        let config = self.lifecycle_config().clone();
        let settled = poll_until(config.reset_timeout, config.reset_poll_interval, || {
            Ok(self.call_status()?.voice == target)
        })?;
        if settled {
            info!(state = %target, "call state settled");
        } else {
            warn!(state = %target, waited = ?config.reset_timeout, "call state did not settle, continuing");
        }
        Ok(())
    }

    /// Waits for the device to register.
    ///
    /// Returns as soon as the voice state is `IDLE` or the packet state is
    /// `COMMUNICATION`; either one is enough.
    pub fn wait_for_ue_registration(&self) -> Result<()> {
        let config = self.lifecycle_config().clone();
        info!("waiting for UE registration");
        let registered = poll_until(
            config.registration_timeout,
            config.registration_poll_interval,
            || {
                let status = self.call_status()?;
                Ok(status.voice == CallState::Idle || status.packet == CallState::Communication)
            },
        )?;
        if !registered {
            return Err(CallboxError::LifecycleTimeout {
                target: "UE registration".to_string(),
                waited: config.registration_timeout,
            });
        }
        info!("UE registered");
        Ok(())
    }
}

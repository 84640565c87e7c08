//! Text front end for the interface loop.
//!
//! Drains the engine mailbox on every tick, folds the messages into a
//! [`UiState`] and answers dialogs from the terminal.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use ota_engine::{
    DeviceControl, MessageKind, Popup, UiMessage, UiReceiver, UiSender, UiState, UpdateHandle,
    UpdateOrchestrator,
};

/// Restart hook for a host run: there is no device to reset.
pub struct LogRestart;

impl DeviceControl for LogRestart {
    fn restart(&self) {
        info!("device restart requested");
        println!("restarting device");
    }
}

#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    pub poll_interval_ms: u64,
    /// Answer every confirmation with yes and never retry
    pub auto_confirm: bool,
    pub restart_on_success: bool,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            auto_confirm: false,
            restart_on_success: false,
        }
    }
}

pub struct Console {
    receiver: UiReceiver,
    events: UiSender,
    state: UiState,
    options: ConsoleOptions,
}

impl Console {
    pub fn new(receiver: UiReceiver, events: UiSender, options: ConsoleOptions) -> Self {
        Self {
            receiver,
            events,
            state: UiState::new(),
            options,
        }
    }

    /// Run the interface loop until the attempt ends or the user cancels.
    pub fn run(&mut self, orchestrator: &mut UpdateOrchestrator) -> anyhow::Result<()> {
        let mut worker: Option<UpdateHandle> = None;

        loop {
            self.pump();

            if self.state.take_start_request() {
                worker = Some(orchestrator.start_update()?);
            }

            match self.state.popup.clone() {
                Some(Popup::ConfirmVersion(name)) => {
                    self.state.dismiss();
                    if self.ask(&format!("Install {name}?"))? {
                        self.events.start_update();
                    } else {
                        println!("update cancelled");
                        return Ok(());
                    }
                }
                Some(Popup::NetworkError) => {
                    self.state.dismiss();
                    println!("network unavailable");
                }
                _ => {}
            }

            if let Some(handle) = worker.take() {
                if !handle.is_finished() {
                    worker = Some(handle);
                } else {
                    // The outcome events are queued before the worker exits.
                    self.pump();
                    self.state.dismiss();
                    match handle.join() {
                        Ok(report) => {
                            println!(
                                "installed {}: {} file(s), {} bytes",
                                report.version, report.files_written, report.bytes_written
                            );
                            if self.options.restart_on_success {
                                orchestrator.request_restart()?;
                            }
                            return Ok(());
                        }
                        Err(e) => {
                            println!("update failed: {e}");
                            if !self.options.auto_confirm && self.ask("Retry?")? {
                                self.events.start_update();
                            } else {
                                return Err(e.into());
                            }
                        }
                    }
                }
            }

            thread::sleep(Duration::from_millis(self.options.poll_interval_ms));
        }
    }

    fn pump(&mut self) {
        let mut messages = Vec::new();
        self.receiver.poll(|msg| messages.push(msg));
        for msg in &messages {
            self.state.apply(msg);
            render(msg);
        }
    }

    fn ask(&self, question: &str) -> anyhow::Result<bool> {
        if self.options.auto_confirm {
            return Ok(true);
        }
        print!("{question} [y/N] ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

fn render(msg: &UiMessage) {
    debug!(kind = %msg.kind, payload = ?msg.payload(), "ui message");
    let payload = msg.payload().unwrap_or_default();
    match msg.kind {
        MessageKind::UpdateFiles => println!("writing {payload}"),
        MessageKind::UpdateProgress => println!("  {payload:>3}%"),
        MessageKind::UpdateBle | MessageKind::UpdateNet => println!("link: {payload}"),
        MessageKind::ShowSuccessPopup => println!("update complete"),
        MessageKind::ShowFailurePopup => println!("update failed"),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ota_engine::{
        mailbox, EngineConfig, EngineContext, FileTransport, MemoryFlash, OtaState,
        PackageBuilder, VersionEntry,
    };

    use super::*;

    const APP_ADDR: u32 = 0x1231_0000;

    fn orchestrator(tx: UiSender) -> (UpdateOrchestrator, Arc<MemoryFlash>) {
        let config = EngineConfig::default();
        let flash = Arc::new(MemoryFlash::new(
            config.partition.loader_start,
            config.partition.loader_size as usize,
        ));
        let ctx = EngineContext::new(config, flash.clone(), Arc::new(FileTransport::new()), tx)
            .unwrap()
            .with_device(Arc::new(LogRestart));
        (UpdateOrchestrator::new(ctx), flash)
    }

    #[test]
    fn test_auto_confirmed_update_from_local_package() {
        let dir = tempfile::TempDir::new().unwrap();
        let image: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let package = PackageBuilder::new()
            .add_file("app.bin", APP_ADDR, 0x1_0000, image.clone())
            .unwrap()
            .build()
            .unwrap();
        let path = dir.path().join("v2.bin");
        std::fs::write(&path, &package).unwrap();

        let (tx, rx) = mailbox(64);
        let (mut orch, flash) = orchestrator(tx.clone());
        orch.context()
            .catalog()
            .replace_all(&[VersionEntry::new(
                "v2.0.0",
                &format!("file://{}", path.display()),
                true,
            )])
            .unwrap();
        orch.select_version(0).unwrap();

        let mut console = Console::new(
            rx,
            tx,
            ConsoleOptions {
                poll_interval_ms: 1,
                auto_confirm: true,
                restart_on_success: true,
            },
        );
        console.run(&mut orch).unwrap();

        assert_eq!(orch.state(), OtaState::Succeeded);
        assert_eq!(flash.snapshot(APP_ADDR, image.len()).unwrap(), image);
        assert_eq!(console.state.progress, 100);
        assert_eq!(console.state.current_file, "app.bin");
    }

    #[test]
    fn test_missing_package_fails_without_retry() {
        let (tx, rx) = mailbox(64);
        let (mut orch, _flash) = orchestrator(tx.clone());
        orch.context()
            .catalog()
            .replace_all(&[VersionEntry::new("v2.0.0", "file:///nonexistent/v2.bin", true)])
            .unwrap();
        orch.select_version(0).unwrap();

        let mut console = Console::new(
            rx,
            tx,
            ConsoleOptions {
                poll_interval_ms: 1,
                auto_confirm: true,
                restart_on_success: false,
            },
        );
        assert!(console.run(&mut orch).is_err());
        assert!(matches!(orch.state(), OtaState::Failed(_)));
    }
}

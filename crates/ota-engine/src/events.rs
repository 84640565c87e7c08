//! Mailbox between the update engine and the interface loop.
//!
//! Any thread may send; exactly one interface loop receives. Messages carry
//! owned payloads, so a message that cannot be queued is dropped on the
//! sending side and never leaks into the consumer.

use std::fmt;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 20;

/// What a message asks the interface to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Bluetooth link icon, payload `"ble"` or `"ble_close"`
    UpdateBle,
    /// Network link icon, payload `"net"` or `"net_close"`
    UpdateNet,
    /// Progress percentage `"0"`..`"100"`
    UpdateProgress,
    /// Name of the binary being written
    UpdateFiles,
    /// Progress color, payload `normal|success|error`
    UpdateProgressColor,
    /// Update button label
    UpdateButton,
    /// Update button color, payload `normal|success|error`
    UpdateButtonColor,
    ShowFailurePopup,
    ShowSuccessPopup,
    ShowNetworkErrorPopup,
    /// Confirmation prompt, payload is the selected version name
    ShowVersionConfirm,
    /// User confirmed; the interface should start the attempt
    StartUpdate,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateBle => "update_ble",
            Self::UpdateNet => "update_net",
            Self::UpdateProgress => "update_progress",
            Self::UpdateFiles => "update_files",
            Self::UpdateProgressColor => "update_progress_color",
            Self::UpdateButton => "update_button",
            Self::UpdateButtonColor => "update_button_color",
            Self::ShowFailurePopup => "show_failure_popup",
            Self::ShowSuccessPopup => "show_success_popup",
            Self::ShowNetworkErrorPopup => "show_network_error_popup",
            Self::ShowVersionConfirm => "show_version_confirm",
            Self::StartUpdate => "start_update",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link indicator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Ble,
    BleClosed,
    Net,
    NetClosed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ble => "ble",
            Self::BleClosed => "ble_close",
            Self::Net => "net",
            Self::NetClosed => "net_close",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ble" => Some(Self::Ble),
            "ble_close" => Some(Self::BleClosed),
            "net" => Some(Self::Net),
            "net_close" => Some(Self::NetClosed),
            _ => None,
        }
    }

    fn kind(&self) -> MessageKind {
        match self {
            Self::Ble | Self::BleClosed => MessageKind::UpdateBle,
            Self::Net | Self::NetClosed => MessageKind::UpdateNet,
        }
    }
}

/// Color of the progress indicator and the update button.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusColor {
    #[default]
    Normal,
    Success,
    Error,
}

impl StatusColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One mailbox message. The payload is owned by whoever holds the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiMessage {
    pub kind: MessageKind,
    pub payload: Option<String>,
}

impl UiMessage {
    pub fn new(kind: MessageKind, payload: Option<&str>) -> Self {
        Self {
            kind,
            payload: payload.map(str::to_owned),
        }
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }
}

/// Create a mailbox with room for `capacity` messages.
pub fn mailbox(capacity: usize) -> (UiSender, UiReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (UiSender { tx }, UiReceiver { rx })
}

/// Producer side of the mailbox. Cheap to clone.
#[derive(Clone)]
pub struct UiSender {
    tx: mpsc::Sender<UiMessage>,
}

impl UiSender {
    /// Queue a message without blocking.
    ///
    /// Returns `false` when the mailbox is full or closed; the message and
    /// its payload are dropped here.
    pub fn send(&self, kind: MessageKind, payload: Option<&str>) -> bool {
        match self.tx.try_send(UiMessage::new(kind, payload)) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                warn!(kind = %dropped.kind, "ui mailbox full, message dropped");
                false
            }
            Err(TrySendError::Closed(dropped)) => {
                debug!(kind = %dropped.kind, "ui mailbox closed, message dropped");
                false
            }
        }
    }

    pub fn link_status(&self, status: LinkStatus) -> bool {
        self.send(status.kind(), Some(status.as_str()))
    }

    pub fn progress(&self, percent: u8) -> bool {
        self.send(MessageKind::UpdateProgress, Some(&percent.to_string()))
    }

    pub fn current_file(&self, name: &str) -> bool {
        self.send(MessageKind::UpdateFiles, Some(name))
    }

    pub fn progress_color(&self, color: StatusColor) -> bool {
        self.send(MessageKind::UpdateProgressColor, Some(color.as_str()))
    }

    pub fn button_label(&self, label: &str) -> bool {
        self.send(MessageKind::UpdateButton, Some(label))
    }

    pub fn button_color(&self, color: StatusColor) -> bool {
        self.send(MessageKind::UpdateButtonColor, Some(color.as_str()))
    }

    pub fn failure_popup(&self) -> bool {
        self.send(MessageKind::ShowFailurePopup, None)
    }

    pub fn success_popup(&self) -> bool {
        self.send(MessageKind::ShowSuccessPopup, None)
    }

    pub fn network_error_popup(&self) -> bool {
        self.send(MessageKind::ShowNetworkErrorPopup, None)
    }

    pub fn confirm_version(&self, name: &str) -> bool {
        self.send(MessageKind::ShowVersionConfirm, Some(name))
    }

    pub fn start_update(&self) -> bool {
        self.send(MessageKind::StartUpdate, None)
    }
}

/// Consumer side of the mailbox, owned by the interface loop.
pub struct UiReceiver {
    rx: mpsc::Receiver<UiMessage>,
}

impl UiReceiver {
    /// Take the next queued message, if any.
    pub fn try_recv(&mut self) -> Option<UiMessage> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Hand every queued message to `handler` without blocking.
    ///
    /// Returns how many messages were handled.
    pub fn poll(&mut self, mut handler: impl FnMut(UiMessage)) -> usize {
        let mut handled = 0;
        while let Some(msg) = self.try_recv() {
            handler(msg);
            handled += 1;
        }
        handled
    }
}

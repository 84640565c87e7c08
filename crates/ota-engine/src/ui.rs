//! Interface-side view model.
//!
//! `UiState` is what a renderer would draw: the interface loop folds every
//! mailbox message into it and then renders the result. It carries no
//! widget toolkit types, so any front end can sit on top.

use crate::events::{LinkStatus, MessageKind, StatusColor, UiMessage};

/// Label of the confirm button when starting an update.
pub const LABEL_CONFIRM: &str = "Confirm";

/// Label of the confirm button after a failed attempt.
pub const LABEL_RETRY: &str = "Retry";

/// Label of the confirm button after a successful attempt.
pub const LABEL_RESTART: &str = "Restart";

/// Label of the update button while an attempt runs.
pub const LABEL_UPDATING: &str = "Updating";

/// Label of the only button of the network error dialog.
pub const LABEL_CLOSE: &str = "Close";

/// Modal dialog currently shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popup {
    ConfirmVersion(String),
    Failure,
    Success,
    NetworkError,
}

impl Popup {
    /// Text of the confirm button inside the dialog.
    pub fn confirm_label(&self) -> &'static str {
        match self {
            Self::ConfirmVersion(_) => LABEL_CONFIRM,
            Self::Failure => LABEL_RETRY,
            Self::Success => LABEL_RESTART,
            Self::NetworkError => LABEL_CLOSE,
        }
    }
}

/// What pressing the confirm button should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    StartUpdate,
    Restart,
    None,
}

/// Everything the interface displays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    pub ble_connected: bool,
    pub net_connected: bool,
    pub progress: u8,
    pub progress_color: StatusColor,
    pub current_file: String,
    pub button_label: String,
    pub button_color: StatusColor,
    pub popup: Option<Popup>,
    /// Set when a start-update trigger was received and not yet consumed
    pub start_requested: bool,
}

impl UiState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one mailbox message into the state.
    ///
    /// Payloads that do not parse are ignored, as a renderer would.
    pub fn apply(&mut self, msg: &UiMessage) {
        let payload = msg.payload();
        match msg.kind {
            MessageKind::UpdateBle | MessageKind::UpdateNet => {
                match payload.and_then(LinkStatus::parse) {
                    Some(LinkStatus::Ble) => self.ble_connected = true,
                    Some(LinkStatus::BleClosed) => self.ble_connected = false,
                    Some(LinkStatus::Net) => self.net_connected = true,
                    Some(LinkStatus::NetClosed) => self.net_connected = false,
                    None => {}
                }
            }
            MessageKind::UpdateProgress => {
                if let Some(percent) = payload.and_then(|p| p.parse::<u8>().ok()) {
                    self.progress = percent.min(100);
                }
            }
            MessageKind::UpdateFiles => {
                if let Some(name) = payload {
                    self.current_file = name.to_string();
                }
            }
            MessageKind::UpdateProgressColor => {
                if let Some(color) = payload.and_then(StatusColor::parse) {
                    self.progress_color = color;
                }
            }
            MessageKind::UpdateButton => {
                if let Some(label) = payload {
                    self.button_label = label.to_string();
                }
            }
            MessageKind::UpdateButtonColor => {
                if let Some(color) = payload.and_then(StatusColor::parse) {
                    self.button_color = color;
                }
            }
            MessageKind::ShowFailurePopup => self.popup = Some(Popup::Failure),
            MessageKind::ShowSuccessPopup => self.popup = Some(Popup::Success),
            MessageKind::ShowNetworkErrorPopup => self.popup = Some(Popup::NetworkError),
            MessageKind::ShowVersionConfirm => {
                let name = payload.unwrap_or_default().to_string();
                self.popup = Some(Popup::ConfirmVersion(name));
            }
            MessageKind::StartUpdate => {
                self.popup = None;
                self.start_requested = true;
            }
        }
    }

    /// Action bound to the confirm button of the visible dialog.
    ///
    /// The network error dialog only closes: a failed query leaves nothing
    /// selected to install.
    pub fn confirm_action(&self) -> ConfirmAction {
        match self.popup {
            Some(Popup::ConfirmVersion(_)) | Some(Popup::Failure) => ConfirmAction::StartUpdate,
            Some(Popup::Success) => ConfirmAction::Restart,
            Some(Popup::NetworkError) | None => ConfirmAction::None,
        }
    }

    /// Close the visible dialog.
    pub fn dismiss(&mut self) {
        self.popup = None;
    }

    /// Consume a pending start-update trigger.
    pub fn take_start_request(&mut self) -> bool {
        std::mem::take(&mut self.start_requested)
    }
}

use crate::error::DashboardError;
use crate::relay::Relay;

/// Notification variant for styling different kinds of notices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationVariant {
    #[default]
    Error,
    Success,
}

/// A user-facing notice. `message` is what the user reads, `technical` is the
/// raw error for logs.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub technical: String,
    pub variant: NotificationVariant,
}

impl Notification {
    pub fn from_error(err: &DashboardError) -> Self {
        let (title, message) = match err {
            DashboardError::Connection { .. } => (
                "Connection Error",
                "Error connecting to database, please try again!".to_string(),
            ),
            DashboardError::Query { stage, .. } => (
                "Loading Error",
                format!("Error loading {stage}, please try again!"),
            ),
            DashboardError::LayerResolution { title, .. } => {
                ("Layer Error", format!("Error loading layer {title}!"))
            }
            DashboardError::RenderConfig { title, setting, .. } => (
                "Layer Warning",
                format!("Error loading {setting} for layer {title}, using defaults."),
            ),
            DashboardError::MapMutation { title, .. } => {
                ("Map Error", format!("Error adding layer {title}!"))
            }
            DashboardError::DuplicateTitle(_) => (
                "Save Template",
                "Error, a template with this title already exists!".to_string(),
            ),
            DashboardError::Validation(message) => ("Save Template", format!("Error, {message}!")),
            DashboardError::RemoteWrite(_) | DashboardError::Auth(_) => (
                "Save Template",
                "Error saving template, please try again!".to_string(),
            ),
            DashboardError::UnknownLayer(_) | DashboardError::UnknownTemplate(_) => {
                ("Dashboard Error", err.to_string())
            }
        };
        Self {
            title: title.to_string(),
            message,
            technical: err.to_string(),
            variant: NotificationVariant::Error,
        }
    }

    pub fn layer_info_failed(technical: impl Into<String>) -> Self {
        Self {
            title: "Layer Info".to_string(),
            message: "Error loading layer info!".to_string(),
            technical: technical.into(),
            variant: NotificationVariant::Error,
        }
    }

    pub fn template_saved(title: &str) -> Self {
        Self {
            title: "Save Template".to_string(),
            message: "Successfully saved new template!".to_string(),
            technical: format!("Saved template {title:?}"),
            variant: NotificationVariant::Success,
        }
    }
}

/// Publishes notifications and mirrors them into the log.
#[derive(Clone, Debug, Default)]
pub struct Notifier {
    notification_relay: Relay<Notification>,
}

impl Notifier {
    pub fn new(notification_relay: Relay<Notification>) -> Self {
        Self { notification_relay }
    }

    pub fn notify(&self, notification: Notification) {
        match notification.variant {
            NotificationVariant::Error => log::error!("{}", notification.technical),
            NotificationVariant::Success => log::info!("{}", notification.technical),
        }
        self.notification_relay.send(notification);
    }

    pub fn error(&self, err: &DashboardError) {
        self.notify(Notification::from_error(err));
    }
}

use std::{fmt, sync::Arc};

use compliscan_core::{
    control::ControlSurface, notify::NotificationGateway,
    submission::SubmissionGateway,
};

use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub submissions: Arc<SubmissionGateway>,
    pub control: Arc<ControlSurface>,
    pub notifications: Arc<NotificationGateway>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

use crate::{
    error::ChatError,
    types::{ClientEvent, SessionState},
};

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: SessionState::Anonymous,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Gate one outbound event against the lifecycle, advancing the state for
    /// identity requests and logout.
    pub fn apply(&mut self, event: &ClientEvent) -> Result<SessionState, ChatError> {
        use ClientEvent::*;

        match event {
            CreateUser { .. } => self.transition_from_any_of(
                &[
                    SessionState::Anonymous,
                    SessionState::Failed,
                    SessionState::LoggedOut,
                ],
                SessionState::Creating,
                "create_user",
            ),
            GetUser { .. } => self.transition_from_any_of(
                &[
                    SessionState::Anonymous,
                    SessionState::Failed,
                    SessionState::LoggedOut,
                ],
                SessionState::Restoring,
                "get_user",
            ),
            UserDisconnect { .. } => self.transition_from_any_of(
                &[
                    SessionState::Creating,
                    SessionState::Restoring,
                    SessionState::Active,
                    SessionState::Failed,
                ],
                SessionState::LoggedOut,
                "user_disconnect",
            ),
            _ => {
                if self.is_active() {
                    Ok(self.state)
                } else {
                    Err(ChatError::invalid_state(self.state, "room/message event"))
                }
            }
        }
    }

    pub fn on_identity_result(&mut self, success: bool) -> Result<SessionState, ChatError> {
        if !matches!(
            self.state,
            SessionState::Creating | SessionState::Restoring
        ) {
            return Err(ChatError::invalid_state(self.state, "on_identity_result"));
        }

        self.state = if success {
            SessionState::Active
        } else {
            SessionState::Failed
        };
        Ok(self.state)
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[SessionState],
        next: SessionState,
        action: &str,
    ) -> Result<SessionState, ChatError> {
        if !expected.contains(&self.state) {
            return Err(ChatError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(next)
    }
}

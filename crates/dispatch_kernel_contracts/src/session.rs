#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_label_token;
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherUser {
    pub user_id: String,
    pub email: Option<String>,
}

impl DispatcherUser {
    pub fn v1(user_id: impl Into<String>, email: Option<String>) -> Result<Self, ContractViolation> {
        let user = Self {
            user_id: user_id.into(),
            email,
        };
        user.validate()?;
        Ok(user)
    }

    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.user_id)
    }
}

impl Validate for DispatcherUser {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_label_token("dispatcher_user.user_id", &self.user_id, 128)?;
        if let Some(email) = &self.email {
            validate_label_token("dispatcher_user.email", email, 254)?;
            if !email.contains('@') {
                return Err(ContractViolation::InvalidValue {
                    field: "dispatcher_user.email",
                    reason: "must contain '@'",
                });
            }
        }
        Ok(())
    }
}

use std::sync::Arc;

use crate::db::types::UserRole;

/// Identity of whoever is taking (or previewing) the exam.
///
/// Passed explicitly into the session controller; nothing in the crate reads a global user.
#[derive(Debug, Clone)]
pub struct SessionContext {
    inner: Arc<InnerContext>,
}

#[derive(Debug)]
struct InnerContext {
    email: String,
    display_name: String,
    role: UserRole,
}

impl SessionContext {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>, role: UserRole) -> Self {
        Self {
            inner: Arc::new(InnerContext {
                email: email.into().trim().to_ascii_lowercase(),
                display_name: display_name.into(),
                role,
            }),
        }
    }

    pub fn student(email: impl Into<String>) -> Self {
        let email = email.into().trim().to_string();
        let display_name = email.split('@').next().unwrap_or_default().to_string();
        Self::new(email, display_name, UserRole::Student)
    }

    pub fn email(&self) -> &str {
        &self.inner.email
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn role(&self) -> UserRole {
        self.inner.role
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self.role(), UserRole::Admin)
    }
}

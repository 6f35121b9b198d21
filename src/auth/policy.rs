//! Default-deny authorization.
//!
//! [`authorize`] is evaluated twice per request: once with `owner = None`
//! before anything is loaded (can this actor reach the resource class at all),
//! and once with the owner of the loaded instance (can this actor act on this
//! record). Anything not explicitly allowed below is denied.

use crate::{db::User, error::ApiError, public_id::PublicId};

#[derive(Debug, Clone)]
pub enum Actor {
    Anonymous,
    User(User),
}

impl Actor {
    pub fn user(&self) -> Option<&User> {
        match self {
            Actor::Anonymous => None,
            Actor::User(u) => Some(u),
        }
    }

    pub fn public_id(&self) -> Option<PublicId> {
        self.user().map(|u| u.public_id)
    }

    pub fn is_superuser(&self) -> bool {
        self.user().is_some_and(|u| u.is_superuser)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    Like,
}

impl Action {
    /// Side-effect-free actions.
    pub fn is_safe(self) -> bool {
        matches!(self, Action::Read)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    User,
    Post,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Unauthenticated,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    #[cfg(test)]
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }

    pub fn into_result(self) -> Result<(), ApiError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(Denial::Unauthenticated) => Err(ApiError::Forbidden(
                "Authentication credentials were not provided.".into(),
            )),
            Decision::Deny(Denial::Forbidden) => Err(ApiError::Forbidden(
                "You do not have permission to perform this action.".into(),
            )),
        }
    }
}

const DENY: Decision = Decision::Deny(Denial::Forbidden);

/// `owner` is the public id of the instance owner (post/comment author, or
/// the user record itself); `None` asks the request-level question.
pub fn authorize(
    actor: &Actor,
    action: Action,
    resource: Resource,
    owner: Option<PublicId>,
) -> Decision {
    let Some(user) = actor.user() else {
        return match resource {
            Resource::Post | Resource::Comment if action.is_safe() => Decision::Allow,
            _ => Decision::Deny(Denial::Unauthenticated),
        };
    };
    let owns = |owner: PublicId| owner == user.public_id || user.is_superuser;

    match (resource, owner) {
        (Resource::Post | Resource::Comment, None) => Decision::Allow,
        (Resource::Post | Resource::Comment, Some(owner)) => match action {
            Action::Read => Decision::Allow,
            Action::Like if resource == Resource::Post => Decision::Allow,
            Action::Update | Action::Delete if owns(owner) => Decision::Allow,
            _ => DENY,
        },
        (Resource::User, None) => match action {
            Action::Read | Action::Update => Decision::Allow,
            _ => DENY,
        },
        (Resource::User, Some(target)) => match action {
            Action::Read => Decision::Allow,
            Action::Update if owns(target) => Decision::Allow,
            _ => DENY,
        },
    }
}

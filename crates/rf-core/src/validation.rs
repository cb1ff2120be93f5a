//! Client-side checks run before any remote call.

use crate::error::{AppError, Result};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_CONTENT_CHARS: usize = 5000;
pub const MAX_COMMENT_CHARS: usize = 5000;
pub const MAX_USERNAME_CHARS: usize = 32;
pub const MIN_PASSWORD_CHARS: usize = 6;

/// The new-post form as submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    /// Category name as picked from the list.
    pub category: String,
    pub nsfw: bool,
    pub anonymous: bool,
}

/// A draft that passed validation, with trimmed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedDraft {
    pub title: String,
    pub content: String,
    pub category: String,
    pub nsfw: bool,
    pub anonymous: bool,
}

fn invalid(msg: &str) -> AppError {
    AppError::ValidationError(msg.to_string())
}

pub fn validate_post(draft: &PostDraft) -> Result<CheckedDraft> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(invalid("Title is required"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::ValidationError(format!(
            "Title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    let category = draft.category.trim();
    if category.is_empty() {
        return Err(invalid("Please select a category"));
    }
    let content = draft.content.trim();
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::ValidationError(format!(
            "Content must be at most {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(CheckedDraft {
        title: title.to_string(),
        content: content.to_string(),
        category: category.to_string(),
        nsfw: draft.nsfw,
        anonymous: draft.anonymous,
    })
}

pub fn validate_comment(content: &str) -> Result<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(invalid("Comment cannot be empty"));
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(AppError::ValidationError(format!(
            "Comment must be at most {MAX_COMMENT_CHARS} characters"
        )));
    }
    Ok(content.to_string())
}

pub fn validate_credentials(email: &str, password: &str) -> Result<()> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(invalid("A valid email address is required"));
    }
    if password.is_empty() {
        return Err(invalid("Password is required"));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<String> {
    let username = username.trim();
    if username.is_empty() {
        return Err(invalid("Username is required"));
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(AppError::ValidationError(format!(
            "Username must be at most {MAX_USERNAME_CHARS} characters"
        )));
    }
    Ok(username.to_string())
}

pub fn validate_new_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::ValidationError(format!(
            "Password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str, category: &str) -> PostDraft {
        PostDraft {
            title: title.into(),
            content: "  body  ".into(),
            category: category.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_post_requires_title_and_category() {
        assert!(matches!(validate_post(&draft("   ", "TECH")), Err(AppError::ValidationError(m)) if m == "Title is required"));
        assert!(matches!(validate_post(&draft("Hello", "")), Err(AppError::ValidationError(m)) if m == "Please select a category"));

        let ok = validate_post(&draft("  Hello  ", "TECH")).unwrap();
        assert_eq!(ok.title, "Hello");
        assert_eq!(ok.content, "body");
    }

    #[test]
    fn test_title_length_counts_characters() {
        let exact = "é".repeat(MAX_TITLE_CHARS);
        assert!(validate_post(&draft(&exact, "TECH")).is_ok());
        let long = "é".repeat(MAX_TITLE_CHARS + 1);
        assert!(validate_post(&draft(&long, "TECH")).is_err());
    }

    #[test]
    fn test_blank_comment_is_rejected() {
        assert!(validate_comment(" \n\t").is_err());
        assert_eq!(validate_comment(" nice ").unwrap(), "nice");
    }
}

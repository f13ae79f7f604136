use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a post.
///
/// `draft -> scheduled -> (published | partially_published | failed)`, with
/// `draft` allowed to jump straight to a terminal state on immediate publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
    PartiallyPublished,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::PartiallyPublished => "partially_published",
            PostStatus::Failed => "failed",
        }
    }

    /// Terminal states are only reached through the scheduler.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Published | PostStatus::PartiallyPublished | PostStatus::Failed
        )
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "published" => Ok(PostStatus::Published),
            "partially_published" => Ok(PostStatus::PartiallyPublished),
            "failed" => Ok(PostStatus::Failed),
            other => Err(format!("unknown post status '{}'", other)),
        }
    }
}

/// Outcome of one post on one connected account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    Published,
    Failed,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Published => "published",
            TargetStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TargetStatus::Pending),
            "published" => Ok(TargetStatus::Published),
            "failed" => Ok(TargetStatus::Failed),
            other => Err(format!("unknown target status '{}'", other)),
        }
    }
}

/// Derive a post's status from its targets once a publish attempt finished.
///
/// Every target published -> `Published`; none published (or no targets at
/// all) -> `Failed`; anything in between -> `PartiallyPublished`.
pub fn aggregate_post_status(targets: &[TargetStatus]) -> PostStatus {
    let published = targets
        .iter()
        .filter(|s| **s == TargetStatus::Published)
        .count();

    if published == 0 {
        PostStatus::Failed
    } else if published == targets.len() {
        PostStatus::Published
    } else {
        PostStatus::PartiallyPublished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_all_published() {
        let s = aggregate_post_status(&[TargetStatus::Published, TargetStatus::Published]);
        assert_eq!(s, PostStatus::Published);
    }

    #[test]
    fn aggregate_all_failed() {
        let s = aggregate_post_status(&[TargetStatus::Failed, TargetStatus::Failed]);
        assert_eq!(s, PostStatus::Failed);
    }

    #[test]
    fn aggregate_mixed_is_partial() {
        let s = aggregate_post_status(&[TargetStatus::Published, TargetStatus::Failed]);
        assert_eq!(s, PostStatus::PartiallyPublished);
    }

    #[test]
    fn aggregate_pending_counts_as_not_published() {
        let s = aggregate_post_status(&[TargetStatus::Pending]);
        assert_eq!(s, PostStatus::Failed);
    }

    #[test]
    fn aggregate_empty_is_failed() {
        assert_eq!(aggregate_post_status(&[]), PostStatus::Failed);
    }

    #[test]
    fn status_strings_match_storage_form() {
        assert_eq!(
            "partially_published".parse::<PostStatus>().unwrap(),
            PostStatus::PartiallyPublished
        );
        assert!("archived".parse::<PostStatus>().is_err());
        assert_eq!(TargetStatus::Pending.to_string(), "pending");
        assert!(PostStatus::Failed.is_terminal());
        assert!(!PostStatus::Scheduled.is_terminal());
    }
}

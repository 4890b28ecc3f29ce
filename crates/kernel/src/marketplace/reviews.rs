//! User reviews and rating aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::Rating;
use crate::plugin::{PluginError, PluginResult};

/// A stored review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub user_id: String,
    /// Star rating, 1 through 5.
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub helpful: u64,
}

/// A review as submitted by a user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
    pub user_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

impl NewReview {
    pub fn new(user_id: impl Into<String>, rating: u8) -> Self {
        Self {
            user_id: user_id.into(),
            rating,
            comment: String::new(),
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub(crate) fn into_review(self, plugin: &str) -> PluginResult<Review> {
        if !(1..=5).contains(&self.rating) {
            return Err(PluginError::InvalidReview {
                plugin: plugin.to_string(),
                details: format!("rating must be between 1 and 5, got {}", self.rating),
            });
        }

        Ok(Review {
            id: Uuid::now_v7(),
            user_id: self.user_id,
            rating: self.rating,
            comment: self.comment,
            created_at: Utc::now(),
            helpful: 0,
        })
    }
}

/// Recompute the aggregate rating from every stored review.
pub(crate) fn aggregate(reviews: &[Review]) -> Rating {
    let mut distribution = [0u64; 5];
    let mut sum = 0u64;

    for review in reviews {
        let star = usize::from(review.rating.clamp(1, 5)) - 1;
        if let Some(slot) = distribution.get_mut(star) {
            *slot += 1;
        }
        sum += u64::from(review.rating);
    }

    let count = reviews.len() as u64;
    let average = if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    };

    Rating {
        average,
        count,
        distribution,
    }
}

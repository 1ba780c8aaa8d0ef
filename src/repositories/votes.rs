use async_trait::async_trait;

use super::{new_id, MemoryStore, PgStore, RepositoryError};
use crate::models::votes::{next_vote, vote_delta, NewPost, Post, Vote, VoteDirection, VoteOutcome};

#[async_trait]
pub trait VoteRepository: Send + Sync + 'static {
    async fn insert_post(&self, post: &NewPost) -> Result<Post, RepositoryError>;

    async fn get_post(&self, post_id: &str) -> Result<Option<Post>, RepositoryError>;

    async fn get_vote(&self, user_id: &str, post_id: &str)
        -> Result<Option<Vote>, RepositoryError>;

    /// Applies one press of a vote button. The (user, post) pair never has
    /// more than one vote row and `vote_count` moves by the matching delta.
    async fn toggle_vote(
        &self,
        user_id: &str,
        post_id: &str,
        pressed: VoteDirection,
    ) -> Result<VoteOutcome, RepositoryError>;
}

#[async_trait]
impl VoteRepository for PgStore {
    async fn insert_post(&self, post: &NewPost) -> Result<Post, RepositoryError> {
        let post = sqlx::query_as::<_, Post>(
            r#"
                INSERT INTO posts (id, author_id, space_id, title)
                VALUES ($1, $2, $3, $4)
                RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(&post.author_id)
        .bind(&post.space_id)
        .bind(&post.title)
        .fetch_one(&self.conn)
        .await?;

        Ok(post)
    }

    async fn get_post(&self, post_id: &str) -> Result<Option<Post>, RepositoryError> {
        let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(post)
    }

    async fn get_vote(
        &self,
        user_id: &str,
        post_id: &str,
    ) -> Result<Option<Vote>, RepositoryError> {
        let vote =
            sqlx::query_as::<_, Vote>("SELECT * FROM votes WHERE user_id = $1 AND post_id = $2")
                .bind(user_id)
                .bind(post_id)
                .fetch_optional(&self.conn)
                .await?;

        Ok(vote)
    }

    async fn toggle_vote(
        &self,
        user_id: &str,
        post_id: &str,
        pressed: VoteDirection,
    ) -> Result<VoteOutcome, RepositoryError> {
        let mut tx = self.conn.begin().await?;

        // Row lock on the post serialises concurrent presses on it.
        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM posts WHERE id = $1 FOR UPDATE")
                .bind(post_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound(format!("post {}", post_id)));
        }

        let previous = sqlx::query_as::<_, Vote>(
            "SELECT * FROM votes WHERE user_id = $1 AND post_id = $2",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|v| v.direction);
        let current = next_vote(previous, pressed);

        match current {
            None => {
                sqlx::query("DELETE FROM votes WHERE user_id = $1 AND post_id = $2")
                    .bind(user_id)
                    .bind(post_id)
                    .execute(&mut *tx)
                    .await?;
            }
            Some(direction) => {
                sqlx::query(
                    r#"
                        INSERT INTO votes (user_id, post_id, direction)
                        VALUES ($1, $2, $3)
                        ON CONFLICT (user_id, post_id) DO UPDATE SET direction = EXCLUDED.direction
                    "#,
                )
                .bind(user_id)
                .bind(post_id)
                .bind(direction.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        let post = sqlx::query_as::<_, Post>(
            "UPDATE posts SET vote_count = vote_count + $1 WHERE id = $2 RETURNING *",
        )
        .bind(vote_delta(previous, current))
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(VoteOutcome {
            post,
            previous,
            current,
        })
    }
}

#[async_trait]
impl VoteRepository for MemoryStore {
    async fn insert_post(&self, post: &NewPost) -> Result<Post, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if !state.users.contains_key(&post.author_id) {
            return Err(RepositoryError::NotFound(format!("user {}", post.author_id)));
        }

        let created = Post {
            id: new_id(),
            author_id: post.author_id.clone(),
            space_id: post.space_id.clone(),
            title: post.title.clone(),
            vote_count: 0,
            created_at: now,
        };
        state.posts.insert(created.id.clone(), created.clone());

        Ok(created)
    }

    async fn get_post(&self, post_id: &str) -> Result<Option<Post>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.posts.get(post_id).cloned())
    }

    async fn get_vote(
        &self,
        user_id: &str,
        post_id: &str,
    ) -> Result<Option<Vote>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .votes
            .get(&(user_id.to_string(), post_id.to_string()))
            .cloned())
    }

    async fn toggle_vote(
        &self,
        user_id: &str,
        post_id: &str,
        pressed: VoteDirection,
    ) -> Result<VoteOutcome, RepositoryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if !state.posts.contains_key(post_id) {
            return Err(RepositoryError::NotFound(format!("post {}", post_id)));
        }

        let key = (user_id.to_string(), post_id.to_string());
        let previous = state.votes.get(&key).map(|v| v.direction);
        let current = next_vote(previous, pressed);

        match current {
            None => {
                state.votes.remove(&key);
            }
            Some(direction) => {
                state.votes.insert(
                    key,
                    Vote {
                        user_id: user_id.to_string(),
                        post_id: post_id.to_string(),
                        direction,
                        created_at: now,
                    },
                );
            }
        }

        let post = state
            .posts
            .get_mut(post_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("post {}", post_id)))?;
        post.vote_count += vote_delta(previous, current);

        Ok(VoteOutcome {
            post: post.clone(),
            previous,
            current,
        })
    }
}

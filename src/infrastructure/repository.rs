use crate::domain::ports::TaskStore;
use crate::domain::task::{NewTask, Task, TaskId, TaskStatus};
use crate::error::Result;
use crate::infrastructure::pool::{ConnectionFactory, ConnectionPool, PooledConnection};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence operations a backend connection must support. Implementations
/// share backend state between connections, so `compare_and_set` must be
/// atomic across the whole backend, not per handle.
#[async_trait]
pub trait TaskConnection: PooledConnection {
    async fn insert_task(&self, new: NewTask) -> Result<Task>;
    async fn load_task(&self, id: TaskId) -> Result<Option<Task>>;
    async fn compare_and_set(&self, task: &Task, expected: TaskStatus) -> Result<()>;
    async fn active_tasks(&self) -> Result<Vec<Task>>;
    async fn pending_tasks_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>>;
    async fn all_tasks(&self) -> Result<Vec<Task>>;
}

/// `TaskStore` implemented over the connection pool: every operation checks a
/// handle out, runs the backend call, and returns the handle afterwards.
pub struct TaskRepository<F: ConnectionFactory> {
    pool: ConnectionPool<F>,
}

impl<F> TaskRepository<F>
where
    F: ConnectionFactory,
    F::Conn: TaskConnection,
{
    pub fn new(factory: F, max_size: usize) -> Self {
        Self {
            pool: ConnectionPool::new(factory, max_size),
        }
    }

    /// Builds the repository and pre-warms `min_warm` connections.
    pub async fn with_warm(factory: F, max_size: usize, min_warm: usize) -> Result<Self> {
        let repository = Self::new(factory, max_size);
        repository.pool.warm(min_warm).await?;
        Ok(repository)
    }

    pub async fn shutdown(&self) {
        self.pool.drain_all().await;
    }
}

#[async_trait]
impl<F> TaskStore for TaskRepository<F>
where
    F: ConnectionFactory,
    F::Conn: TaskConnection,
{
    async fn insert(&self, new: NewTask) -> Result<Task> {
        let conn = self.pool.acquire().await?;
        let result = conn.insert_task(new).await;
        self.pool.release(conn).await;
        result
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let conn = self.pool.acquire().await?;
        let result = conn.load_task(id).await;
        self.pool.release(conn).await;
        result
    }

    async fn transition(&self, task: &Task, expected: TaskStatus) -> Result<()> {
        let conn = self.pool.acquire().await?;
        let result = conn.compare_and_set(task, expected).await;
        self.pool.release(conn).await;
        result
    }

    async fn active(&self) -> Result<Vec<Task>> {
        let conn = self.pool.acquire().await?;
        let result = conn.active_tasks().await;
        self.pool.release(conn).await;
        result
    }

    async fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        let conn = self.pool.acquire().await?;
        let result = conn.pending_tasks_older_than(cutoff).await;
        self.pool.release(conn).await;
        result
    }

    async fn all(&self) -> Result<Vec<Task>> {
        let conn = self.pool.acquire().await?;
        let result = conn.all_tasks().await;
        self.pool.release(conn).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::infrastructure::in_memory::MemoryBackend;
    use rust_decimal_macros::dec;

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.into(),
            description: String::new(),
            poster: "alice".into(),
            payment: Amount::new(dec!(100)).unwrap(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_repository_round_trip() {
        let repository = TaskRepository::with_warm(MemoryBackend::new(), 4, 2)
            .await
            .unwrap();

        let task = repository.insert(new_task("Dig a moat")).await.unwrap();
        let loaded = repository.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task);
    }

    #[tokio::test]
    async fn test_repository_ids_are_never_reused() {
        let repository = TaskRepository::new(MemoryBackend::new(), 2);
        let a = repository.insert(new_task("a")).await.unwrap();
        let b = repository.insert(new_task("b")).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_transition_rejects_stale_status() {
        let repository = TaskRepository::new(MemoryBackend::new(), 2);
        let task = repository.insert(new_task("a")).await.unwrap();

        let claimed = task.claim(&"bob".into()).unwrap();
        repository
            .transition(&claimed, TaskStatus::Open)
            .await
            .unwrap();

        // A second writer still holding the open record loses the race
        let rival = task.claim(&"carol".into()).unwrap();
        let err = repository
            .transition(&rival, TaskStatus::Open)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::MarketError::InvalidTransition { .. }
        ));

        let stored = repository.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.worker, Some("bob".into()));
    }
}

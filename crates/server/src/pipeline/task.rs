// Task side-effect pipeline: pushes created and updated tasks to the
// project room via the hub.

use teamline_common::events::Topic;
use teamline_common::types::Task;
use tracing::warn;

use super::chat::decode;
use crate::bus::{ConsumedRecord, HandlerResult, Subscriber};
use crate::ws::Hub;

pub const TASK_SUBSCRIBER_GROUP: &str = "task.subscriber";

const TOPICS: [Topic; 2] = [Topic::TaskCreated, Topic::TaskUpdated];

#[derive(Clone)]
pub struct TaskPipeline {
    hub: Hub,
}

impl TaskPipeline {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    pub fn run(&self, subscriber: &Subscriber) {
        let pipeline = self.clone();
        subscriber.subscribe(&TOPICS, move |record| {
            let pipeline = pipeline.clone();
            async move { pipeline.handle(record).await }
        });
    }

    pub async fn handle(&self, record: ConsumedRecord) -> HandlerResult {
        match record.topic {
            Topic::TaskCreated => {
                let task: Task = decode(&record.payload, "task")?;
                self.hub.send_task_created(&task);
                Ok(())
            }
            Topic::TaskUpdated => {
                let task: Task = decode(&record.payload, "task")?;
                self.hub.send_task_updated(&task);
                Ok(())
            }
            other => {
                warn!(topic = %other, "task pipeline received an unexpected topic");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use teamline_common::events::Topic;
    use teamline_common::protocol::ws::{Frame, RoomKind};
    use teamline_common::types::{Project, ProjectMember, ProjectMemberRole, Task, TaskStatus};
    use uuid::Uuid;

    use super::TaskPipeline;
    use crate::bus::{ConsumedRecord, EventLog, HandlerError, Publisher};
    use crate::service::{ChatService, ProjectService};
    use crate::store::{ChatStore, ProjectStore, UserStore};
    use crate::ws::Hub;

    struct Fixture {
        pipeline: TaskPipeline,
        hub: Hub,
        projects: ProjectStore,
    }

    fn fixture() -> Fixture {
        let log = EventLog::new(1);
        let publisher = Publisher::new(log);
        let users = UserStore::memory();
        let projects = ProjectStore::memory();

        let hub = Hub::new(
            ChatService::new(ChatStore::memory(), users.clone(), publisher.clone()),
            ProjectService::new(projects.clone(), users, publisher.clone()),
            publisher,
        );

        Fixture { pipeline: TaskPipeline::new(hub.clone()), hub, projects }
    }

    async fn project_with_member(store: &ProjectStore, user_id: Uuid) -> Project {
        let project_id = Uuid::new_v4();
        let project = Project {
            id: project_id,
            user_id,
            name: "alpha".to_string(),
            description: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            members: vec![ProjectMember {
                id: Uuid::new_v4(),
                user_id,
                project_id,
                role: ProjectMemberRole::Creator,
                user: None,
            }],
        };
        store.create(&project).await.expect("project should insert");
        project
    }

    fn task_in(project_id: Uuid) -> Task {
        Task {
            id: Uuid::new_v4(),
            project_id,
            author_id: Uuid::new_v4(),
            title: "ship".to_string(),
            description: "it".to_string(),
            status: TaskStatus::Doing,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            author: None,
            changes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn task_events_are_routed_to_the_project_room() {
        let fixture = fixture();
        let member = Uuid::new_v4();
        let project = project_with_member(&fixture.projects, member).await;

        let (mut frames, _epoch) =
            fixture.hub.register(member, Utc::now() + chrono::Duration::minutes(30));
        fixture
            .hub
            .connect_user_to_room(member, project.id, RoomKind::Project)
            .await
            .expect("join should succeed");
        let joined = frames.recv().await.expect("join frame should arrive");
        assert!(matches!(joined, Frame::UserConnected { .. }));

        let task = task_in(project.id);
        let payload = serde_json::to_vec(&task).expect("task should encode");

        fixture
            .pipeline
            .handle(ConsumedRecord {
                topic: Topic::TaskCreated,
                key: None,
                payload: payload.clone(),
                timestamp: Utc::now(),
            })
            .await
            .expect("created broadcast should succeed");

        match frames.recv().await.expect("task_created frame should arrive") {
            Frame::TaskCreated { room_id, data } => {
                assert_eq!(room_id, project.id);
                assert_eq!(data.id, task.id);
            }
            other => panic!("expected task_created frame, got {other:?}"),
        }

        fixture
            .pipeline
            .handle(ConsumedRecord {
                topic: Topic::TaskUpdated,
                key: None,
                payload,
                timestamp: Utc::now(),
            })
            .await
            .expect("updated broadcast should succeed");

        match frames.recv().await.expect("task_updated frame should arrive") {
            Frame::TaskUpdated { room_id, .. } => assert_eq!(room_id, project.id),
            other => panic!("expected task_updated frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_task_payload_is_terminal() {
        let fixture = fixture();

        let result = fixture
            .pipeline
            .handle(ConsumedRecord {
                topic: Topic::TaskCreated,
                key: None,
                payload: b"{}".to_vec(),
                timestamp: Utc::now(),
            })
            .await;

        assert!(matches!(result, Err(HandlerError::Terminal(_))));
    }
}

// Domain services: business rules between the HTTP/WS edges and the
// stores. Services publish domain events after successful mutations.

mod chats;
mod projects;
mod tasks;
mod users;

pub use chats::{
    ChatService, CreateChatMessageRequest, CursorPage, ListMessagesRequest,
    DEFAULT_MESSAGE_PAGE_SIZE, MAX_MESSAGE_PAGE_SIZE,
};
pub use projects::{CreateMemberRequest, CreateProjectRequest, ProjectService, UpdateProjectRequest};
pub use tasks::{CreateTaskRequest, TaskService, UpdateTaskRequest};
pub use users::{CreateUserRequest, LoginRequest, LoginResult, UserService};

// The hub owns every live WebSocket session and the rooms they occupy.
//
// All shared state lives in two id-indexed maps guarded by one mutex;
// membership is stored bidirectionally (room -> user ids, user -> room
// ids) and both sides are always updated under the same lock. The
// writer channel is the only path to a session's socket: fan-out
// enqueues non-blockingly and a full channel drops the frame for that
// recipient only, so a slow consumer never blocks the room.
//
// Permission checks and publishes happen before the mutex is taken;
// the lock is never held across an await point.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use teamline_common::events::Topic;
use teamline_common::protocol::ws::{Frame, RoomKind};
use teamline_common::types::{ChatMember, ChatMessage, Task};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::Publisher;
use crate::error::ApiError;
use crate::service::{ChatService, ProjectService};

pub const PING_INTERVAL: Duration = Duration::from_secs(30);
pub const PONG_TIMEOUT: Duration = Duration::from_secs(10);
pub const PRESENCE_INTERVAL: Duration = Duration::from_secs(10);
pub const WRITER_CHANNEL_CAPACITY: usize = 64;
pub const MAX_FRAME_BYTES: usize = 32 * 1024;

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    state: Mutex<HubState>,
    chats: ChatService,
    projects: ProjectService,
    publisher: Publisher,
    epochs: AtomicU64,
    dropped_frames: AtomicU64,
}

#[derive(Default)]
struct HubState {
    users: HashMap<Uuid, UserSession>,
    rooms: HashMap<Uuid, Room>,
}

struct UserSession {
    epoch: u64,
    token_expires_at: DateTime<Utc>,
    writer: mpsc::Sender<Frame>,
    rooms: HashSet<Uuid>,
    last_pong: Instant,
    awaiting_pong: bool,
}

struct Room {
    kind: RoomKind,
    members: HashSet<Uuid>,
}

/// Writer-loop decision for one ping tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingTick {
    SendPing,
    /// Session is gone, its token expired, or the previous ping went
    /// unanswered past the pong timeout.
    Close,
}

impl Hub {
    pub fn new(chats: ChatService, projects: ProjectService, publisher: Publisher) -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                chats,
                projects,
                publisher,
                epochs: AtomicU64::new(0),
                dropped_frames: AtomicU64::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.state.lock().expect("hub state lock poisoned")
    }

    /// Registers a session for an accepted, verified connection and
    /// returns its writer receiver plus an epoch guarding cleanup.
    ///
    /// Sessions are keyed by user id: a reconnect replaces the previous
    /// session, whose writer channel closes and tears the old
    /// connection down.
    pub fn register(
        &self,
        user_id: Uuid,
        token_expires_at: DateTime<Utc>,
    ) -> (mpsc::Receiver<Frame>, u64) {
        let (writer, receiver) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let epoch = self.inner.epochs.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state();
        let previous = state.users.insert(
            user_id,
            UserSession {
                epoch,
                token_expires_at,
                writer,
                rooms: HashSet::new(),
                last_pong: Instant::now(),
                awaiting_pong: false,
            },
        );

        if let Some(previous) = previous {
            remove_from_rooms(&mut state, user_id, &previous.rooms);
        }

        (receiver, epoch)
    }

    /// Tears a session down: removes it from every room, reaps empty
    /// rooms, and drops the writer sender. The epoch guard keeps a
    /// stale cleanup from removing a newer session for the same user.
    pub fn remove_session(&self, user_id: Uuid, epoch: u64) {
        let mut state = self.state();

        match state.users.get(&user_id) {
            Some(session) if session.epoch == epoch => {}
            _ => return,
        }

        if let Some(session) = state.users.remove(&user_id) {
            remove_from_rooms(&mut state, user_id, &session.rooms);
        }
    }

    /// Permission-checked room join. Chat rooms require chat
    /// membership and record the view as a fire-and-forget
    /// `chat.member.viewed` publish; project rooms require project
    /// access. On success the user is added to the room and a
    /// `user_connected` frame is broadcast to the room, joiner
    /// included.
    pub async fn connect_user_to_room(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        kind: RoomKind,
    ) -> Result<(), ApiError> {
        match kind {
            RoomKind::Chat => {
                self.inner.chats.get_by_id(room_id, user_id).await?;

                let viewed = ChatMember {
                    chat_id: room_id,
                    user_id,
                    last_seen_at: Utc::now(),
                    joined_at: Utc::now(),
                    user: None,
                };
                let publisher = self.inner.publisher.clone();
                tokio::spawn(async move {
                    if let Err(error) = publisher
                        .publish(Topic::ChatMemberViewed, viewed.chat_id, &viewed)
                        .await
                    {
                        warn!(chat_id = %viewed.chat_id, error = %error, "failed to publish chat member viewed");
                    }
                });
            }
            RoomKind::Project => {
                self.inner.projects.get_by_id(room_id, user_id).await?;
            }
        }

        {
            let mut state = self.state();
            let HubState { users, rooms } = &mut *state;

            // The session may have disconnected while the permission
            // check ran.
            let Some(session) = users.get_mut(&user_id) else {
                return Ok(());
            };

            rooms
                .entry(room_id)
                .or_insert_with(|| Room { kind, members: HashSet::new() })
                .members
                .insert(user_id);
            session.rooms.insert(room_id);
        }

        self.send_to_room(room_id, Frame::user_connected(user_id, room_id));
        Ok(())
    }

    /// Removes the user from the room (reaping it when empty) and
    /// broadcasts `user_disconnected` to any remaining members.
    pub fn disconnect_user_from_room(&self, user_id: Uuid, room_id: Uuid) {
        {
            let mut state = self.state();

            let Some(session) = state.users.get_mut(&user_id) else {
                return;
            };
            session.rooms.remove(&room_id);

            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.members.remove(&user_id);
                if room.members.is_empty() {
                    state.rooms.remove(&room_id);
                }
            }
        }

        self.send_to_room(room_id, Frame::user_disconnected(user_id, room_id));
    }

    /// Fan-out: non-blocking enqueue onto each member's writer channel.
    /// A full channel drops the frame for that recipient only.
    pub fn send_to_room(&self, room_id: Uuid, frame: Frame) {
        let mut state = self.state();
        let HubState { users, rooms } = &mut *state;

        let Some(room) = rooms.get(&room_id) else {
            return;
        };

        for member in &room.members {
            let Some(session) = users.get(member) else {
                continue;
            };

            match session.writer.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.inner.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    debug!(user_id = %member, room_id = %room_id, "writer channel full, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Non-blocking enqueue to a single session; drops when full.
    pub fn enqueue_frame(&self, user_id: Uuid, frame: Frame) {
        let state = self.state();
        let Some(session) = state.users.get(&user_id) else {
            return;
        };

        match session.writer.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.dropped_frames.fetch_add(1, Ordering::Relaxed);
                debug!(user_id = %user_id, "writer channel full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn pong_received(&self, user_id: Uuid) {
        let mut state = self.state();
        if let Some(session) = state.users.get_mut(&user_id) {
            session.last_pong = Instant::now();
            session.awaiting_pong = false;
        }
    }

    /// One ping-ticker beat for the writer loop: decides between
    /// sending another ping and retiring the session.
    pub fn ping_tick(&self, user_id: Uuid, epoch: u64) -> PingTick {
        let mut state = self.state();

        let Some(session) = state.users.get_mut(&user_id) else {
            return PingTick::Close;
        };
        if session.epoch != epoch {
            return PingTick::Close;
        }

        if session.token_expires_at <= Utc::now() {
            return PingTick::Close;
        }

        if session.awaiting_pong && session.last_pong.elapsed() > PONG_TIMEOUT {
            return PingTick::Close;
        }

        session.awaiting_pong = true;
        PingTick::SendPing
    }

    pub fn send_chat_message(&self, message: &ChatMessage) {
        self.send_to_room(message.chat_id, Frame::chat_message(message));
    }

    pub fn send_task_created(&self, task: &Task) {
        self.send_to_room(task.project_id, Frame::task_created(task));
    }

    pub fn send_task_updated(&self, task: &Task) {
        self.send_to_room(task.project_id, Frame::task_updated(task));
    }

    /// Frames dropped because a recipient's writer channel was full.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self, user_id: Uuid) -> bool {
        self.state().users.contains_key(&user_id)
    }

    pub fn room_members(&self, room_id: Uuid) -> Option<Vec<Uuid>> {
        self.state()
            .rooms
            .get(&room_id)
            .map(|room| room.members.iter().copied().collect())
    }

    pub fn room_kind(&self, room_id: Uuid) -> Option<RoomKind> {
        self.state().rooms.get(&room_id).map(|room| room.kind)
    }

    pub fn user_rooms(&self, user_id: Uuid) -> Option<Vec<Uuid>> {
        self.state()
            .users
            .get(&user_id)
            .map(|session| session.rooms.iter().copied().collect())
    }

    fn rooms_snapshot(&self) -> Vec<(Uuid, Vec<Uuid>)> {
        self.state()
            .rooms
            .iter()
            .map(|(room_id, room)| (*room_id, room.members.iter().copied().collect()))
            .collect()
    }

    /// Every 10 seconds, snapshot the rooms under the lock and emit a
    /// `users_online` frame per room. Sends are non-blocking, so each
    /// room's fan-out completes immediately.
    pub fn spawn_presence_ticker(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let hub = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRESENCE_INTERVAL);
            interval.reset();

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = interval.tick() => {
                        for (room_id, user_ids) in hub.rooms_snapshot() {
                            hub.send_to_room(room_id, Frame::users_online(room_id, user_ids));
                        }
                    }
                }
            }
        })
    }
}

fn remove_from_rooms(state: &mut HubState, user_id: Uuid, room_ids: &HashSet<Uuid>) {
    for room_id in room_ids {
        if let Some(room) = state.rooms.get_mut(room_id) {
            room.members.remove(&user_id);
            if room.members.is_empty() {
                state.rooms.remove(room_id);
            }
        }
    }
}

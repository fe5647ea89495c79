//! Property-based tests for the entity model and wire codec.
//!
//! Uses proptest to verify:
//! 1. Any server frame carrying task rows survives encode → decode.
//! 2. Random bytes never cause a panic in either decoder.
//! 3. `normalize_text` is idempotent and agrees with `is_creatable`.
//! 4. `sort_comments` always leaves comments in ascending order.

use kanban_proto::backend::{
    ChangeEvent, ChangeKind, ClientFrame, Column, Query, Request, Response, Row,
    ServerFrame, SubscriptionId, Table, TaskRow, Value,
};
use kanban_proto::codec;
use kanban_proto::task::{Comment, CommentId, Task, TaskId, is_creatable, normalize_text};
use kanban_proto::user::UserId;
use proptest::prelude::*;

fn arb_task_row() -> impl Strategy<Value = TaskRow> {
    (
        any::<u64>(),
        "[a-z0-9-]{1,36}",
        "[^\x00]{1,256}",
        any::<bool>(),
        any::<u64>(),
    )
        .prop_map(|(id, user_id, text, completed, created_at)| TaskRow {
            id,
            user_id,
            text,
            completed,
            created_at,
        })
}

fn arb_change_kind() -> impl Strategy<Value = ChangeKind> {
    prop_oneof![
        Just(ChangeKind::Insert),
        Just(ChangeKind::Update),
        Just(ChangeKind::Delete),
    ]
}

fn arb_server_frame() -> impl Strategy<Value = ServerFrame> {
    prop_oneof![
        (any::<u64>(), prop::collection::vec(arb_task_row(), 0..8)).prop_map(|(id, rows)| {
            ServerFrame::Response {
                id,
                response: Response::Rows(rows.into_iter().map(Row::Task).collect()),
            }
        }),
        (any::<u64>(), arb_change_kind(), arb_task_row()).prop_map(|(sub, kind, row)| {
            ServerFrame::Change {
                subscription: SubscriptionId(sub),
                event: ChangeEvent {
                    table: Table::Tasks,
                    kind,
                    row: Row::Task(row),
                },
            }
        }),
        any::<u64>().prop_map(|sub| ServerFrame::Resync {
            subscription: SubscriptionId(sub),
        }),
    ]
}

fn arb_comment() -> impl Strategy<Value = Comment> {
    (any::<u64>(), 0u64..1_000, "[a-z]{1,8}").prop_map(|(id, created_at, text)| Comment {
        id: CommentId::new(id),
        task_id: TaskId::new(1),
        author_name: "Taro Tanaka".to_string(),
        text,
        created_at,
    })
}

proptest! {
    #[test]
    fn server_frame_survives_codec(frame in arb_server_frame()) {
        let bytes = codec::encode_server(&frame).unwrap();
        let decoded = codec::decode_server(&bytes).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn select_request_survives_codec(id in any::<u64>(), owner in "[a-z0-9]{1,16}") {
        let frame = ClientFrame::Request {
            id,
            request: Request::Select(
                Query::all(Table::Tasks).filter(Column::UserId, Value::Text(owner)),
            ),
        };
        let bytes = codec::encode_client(&frame).unwrap();
        prop_assert_eq!(codec::decode_client(&bytes).unwrap(), frame);
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_client(&bytes);
        let _ = codec::decode_server(&bytes);
    }

    #[test]
    fn normalize_text_is_idempotent(text in ".{0,64}") {
        match normalize_text(&text) {
            Some(once) => {
                prop_assert!(is_creatable(&text));
                prop_assert_eq!(normalize_text(&once), Some(once.clone()));
            }
            None => prop_assert!(!is_creatable(&text)),
        }
    }

    #[test]
    fn sort_comments_orders_ascending(comments in prop::collection::vec(arb_comment(), 0..32)) {
        let mut task = Task::new(TaskId::new(1), UserId::new("1"), "task", 0).unwrap();
        task.comments = comments;
        task.sort_comments();
        prop_assert!(task.comments_sorted());
    }
}

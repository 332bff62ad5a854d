//! Command dispatch against the in-memory event store.

use std::sync::Arc;

use async_trait::async_trait;
use eventree::{
    Command, CommandError, CommandHandlerDefinition, CommandRouter, EventPayload,
    JsonEventDataMarshaller, MetaData, StateRebuildingRegistry, SubjectCondition,
};
use eventree_client::{
    Client, ClientError, Event, EventCandidate, EventStream, Health, Precondition, Source,
    StoreOption, Subject,
};
use eventree_memory::InMemoryClient;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Barrier;

#[derive(Debug, Serialize, Deserialize)]
struct BookAdded {
    title: String,
}

impl EventPayload for BookAdded {
    const EVENT_TYPE: &'static str = "book.added";
}

#[derive(Debug, Serialize, Deserialize)]
struct PageAdded {
    number: u32,
    text: String,
}

impl EventPayload for PageAdded {
    const EVENT_TYPE: &'static str = "page.added";
}

#[derive(Debug, PartialEq)]
struct Book {
    title: String,
    pages: u32,
}

struct AddBook {
    isbn: String,
    title: String,
}

impl Command for AddBook {
    fn subject(&self) -> Subject {
        Subject::try_new(format!("/books/{}", self.isbn)).unwrap()
    }

    fn subject_condition(&self) -> SubjectCondition {
        SubjectCondition::Pristine
    }
}

struct AddPage {
    isbn: String,
    text: String,
}

impl Command for AddPage {
    fn subject(&self) -> Subject {
        Subject::try_new(format!("/books/{}", self.isbn)).unwrap()
    }

    fn subject_condition(&self) -> SubjectCondition {
        SubjectCondition::Exists
    }
}

fn state_registry() -> StateRebuildingRegistry {
    let mut registry = StateRebuildingRegistry::new();
    registry.register(|_: Option<Book>, added: BookAdded| Book {
        title: added.title,
        pages: 0,
    });
    registry.register(|book: Option<Book>, _: PageAdded| {
        let book = book.unwrap_or(Book {
            title: String::new(),
            pages: 0,
        });
        Book {
            pages: book.pages + 1,
            ..book
        }
    });
    registry
}

fn library_router(client: Arc<dyn Client>) -> CommandRouter {
    CommandRouter::builder(client, Source::try_new("tag://library.example").unwrap())
        .with_state_registry(state_registry())
        .register(CommandHandlerDefinition::<Book, AddBook, ()>::sourced(
            |_, command, publisher| {
                publisher.publish(&BookAdded {
                    title: command.title.clone(),
                })
            },
        ))
        .register(CommandHandlerDefinition::<Book, AddPage, u32>::sourced(
            |book, command, publisher| {
                let number = book.map_or(0, |b| b.pages) + 1;
                publisher.publish_relative(
                    &format!("pages/{number}"),
                    &PageAdded {
                        number,
                        text: command.text.clone(),
                    },
                )?;
                Ok(number)
            },
        ))
        .build()
}

#[tokio::test]
async fn dispatched_command_persists_its_events() {
    let client = Arc::new(InMemoryClient::new());
    let router = library_router(client.clone());

    router
        .send::<_, ()>(&AddBook {
            isbn: "978-3-16".into(),
            title: "Rust in Practice".into(),
        })
        .await
        .unwrap();

    let events = client
        .read(&Subject::try_new("/books/978-3-16").unwrap(), &[])
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "book.added");
    assert_eq!(events[0].source, "tag://library.example");
    assert_eq!(
        events[0].data.get("payload"),
        Some(&json!({"title": "Rust in Practice"}))
    );
}

#[tokio::test]
async fn sourced_handler_sees_state_rebuilt_from_the_subtree() {
    let client = Arc::new(InMemoryClient::new());
    let router = library_router(client.clone());

    router
        .send::<_, ()>(&AddBook {
            isbn: "1".into(),
            title: "T".into(),
        })
        .await
        .unwrap();

    let first: u32 = router
        .send(&AddPage {
            isbn: "1".into(),
            text: "p1".into(),
        })
        .await
        .unwrap();
    let second: u32 = router
        .send(&AddPage {
            isbn: "1".into(),
            text: "p2".into(),
        })
        .await
        .unwrap();
    assert_eq!((first, second), (1, 2));

    let pages = client
        .read(
            &Subject::try_new("/books/1").unwrap(),
            &[StoreOption::Recursive],
        )
        .await
        .unwrap();
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[2].subject, "/books/1/pages/2");
}

#[tokio::test]
async fn pristine_condition_rejects_the_second_creation() {
    let client = Arc::new(InMemoryClient::new());
    let router = library_router(client.clone());

    let add = |title: &str| AddBook {
        isbn: "42".into(),
        title: title.into(),
    };
    router.send::<_, ()>(&add("first")).await.unwrap();
    let err = router.send::<_, ()>(&add("second")).await.unwrap_err();
    assert!(matches!(err, CommandError::SubjectAlreadyExists(_)), "got {err:?}");
    assert_eq!(client.len(), 1);
}

#[tokio::test]
async fn exists_condition_fails_fast_on_an_empty_subject() {
    let client = Arc::new(InMemoryClient::new());
    let router = library_router(client.clone());

    let err = router
        .send::<_, u32>(&AddPage {
            isbn: "missing".into(),
            text: "p1".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::SubjectDoesNotExist(_)), "got {err:?}");
    assert!(client.is_empty());
}

#[tokio::test]
async fn unregistered_command_is_rejected() {
    struct Unknown;
    impl Command for Unknown {
        fn subject(&self) -> Subject {
            Subject::try_new("/nowhere").unwrap()
        }
    }

    let router = library_router(Arc::new(InMemoryClient::new()));
    let err = router.send::<_, ()>(&Unknown).await.unwrap_err();
    assert!(matches!(err, CommandError::NoHandlerRegistered(_)), "got {err:?}");
}

#[tokio::test]
async fn handler_publishing_nothing_writes_nothing() {
    struct Inspect {
        isbn: String,
    }
    impl Command for Inspect {
        fn subject(&self) -> Subject {
            Subject::try_new(format!("/books/{}", self.isbn)).unwrap()
        }
    }

    let client = Arc::new(InMemoryClient::new());
    let router = CommandRouter::builder(
        client.clone(),
        Source::try_new("tag://library.example").unwrap(),
    )
    .register(CommandHandlerDefinition::<(), Inspect, bool>::command_only(
        |_, _| Ok(true),
    ))
    .build();

    let seen: bool = router.send(&Inspect { isbn: "9".into() }).await.unwrap();
    assert!(seen);
    assert!(client.is_empty());
}

#[tokio::test]
async fn dispatch_metadata_is_stored_with_published_events() {
    let client = Arc::new(InMemoryClient::new());
    let router = library_router(client.clone());

    let mut metadata = MetaData::new();
    metadata.insert("actor".into(), json!("alice"));
    router
        .send_with_metadata::<_, ()>(
            &AddBook {
                isbn: "7".into(),
                title: "T".into(),
            },
            &metadata,
        )
        .await
        .unwrap();

    let events = client
        .read(&Subject::try_new("/books/7").unwrap(), &[])
        .await
        .unwrap();
    assert_eq!(
        events[0].data.get("metadata"),
        Some(&json!({"actor": "alice"}))
    );
}

/// Delegates to an inner client but holds every write at a barrier, forcing
/// overlapping dispatches to both source state before either commits.
struct RendezvousClient {
    inner: Arc<InMemoryClient>,
    barrier: Barrier,
}

#[async_trait]
impl Client for RendezvousClient {
    async fn health(&self) -> Result<Health, ClientError> {
        self.inner.health().await
    }

    async fn write(
        &self,
        candidates: Vec<EventCandidate>,
        preconditions: Vec<Precondition>,
    ) -> Result<Vec<Event>, ClientError> {
        self.barrier.wait().await;
        self.inner.write(candidates, preconditions).await
    }

    async fn read_stream(
        &self,
        subject: &Subject,
        options: &[StoreOption],
    ) -> Result<EventStream, ClientError> {
        self.inner.read_stream(subject, options).await
    }

    async fn observe(
        &self,
        subject: &Subject,
        options: &[StoreOption],
    ) -> Result<EventStream, ClientError> {
        self.inner.observe(subject, options).await
    }
}

#[tokio::test]
async fn racing_pristine_dispatches_produce_exactly_one_winner() {
    let store = Arc::new(InMemoryClient::new());
    let client = Arc::new(RendezvousClient {
        inner: store.clone(),
        barrier: Barrier::new(2),
    });
    let router = library_router(client);

    let add = |title: &str| AddBook {
        isbn: "dup".into(),
        title: title.into(),
    };
    let first = add("left");
    let second = add("right");
    let (left, right) = tokio::join!(
        router.send::<_, ()>(&first),
        router.send::<_, ()>(&second),
    );

    let outcomes = [left, right];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "got {outcomes:?}");
    let conflict = outcomes
        .iter()
        .filter(|r| matches!(r, Err(CommandError::Concurrency(_))))
        .count();
    assert_eq!(conflict, 1, "got {outcomes:?}");
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn envelope_marshaller_is_applied_on_write() {
    use eventree::EventDataMarshaller;

    let client = Arc::new(InMemoryClient::new());
    let router = library_router(client.clone());
    router
        .send::<_, ()>(&AddBook {
            isbn: "5".into(),
            title: "T".into(),
        })
        .await
        .unwrap();

    let events = client
        .read(&Subject::try_new("/books/5").unwrap(), &[])
        .await
        .unwrap();
    let data = JsonEventDataMarshaller.unmarshal(&events[0].data).unwrap();
    assert!(data.metadata.is_empty());
    assert_eq!(data.payload, json!({"title": "T"}));
}

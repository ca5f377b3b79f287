use futures::StreamExt;
use pglink::pubsub::{ReconnectPolicy, Subscriber};
use std::time::Duration;

mod common;
use common::{Backend, accept};

async fn listen_ok(backend: &mut Backend, sql: &str) {
    assert_eq!(backend.simple_query().await, sql);
    backend.command_complete(sql.split(' ').next().unwrap()).await;
    backend.ready(b'I').await;
}

#[tokio::test]
async fn subscribers_share_listen() {
    let (connector, mut backends) = common::connector();
    let (subscriber, mut backend) = tokio::join!(
        Subscriber::builder(connector).connect(),
        accept(&mut backends),
    );
    let subscriber = subscriber.unwrap();

    let (jobs, ()) = tokio::join!(subscriber.subscribe("jobs"), listen_ok(&mut backend, "LISTEN \"jobs\""));
    let mut jobs = jobs.unwrap();
    assert_eq!(jobs.name(), "jobs");

    // already listened, nothing is sent
    let mut other = subscriber.subscribe("jobs").await.unwrap();

    backend.notification(7, "jobs", "hello").await;
    let notif = jobs.next().await.unwrap();
    assert_eq!((notif.process_id(), notif.channel(), notif.payload()), (7, "jobs", "hello"));
    assert_eq!(other.next().await.unwrap().payload(), "hello");

    // notification is dropped for paused channel
    other.pause();
    backend.notification(7, "jobs", "second").await;
    assert_eq!(jobs.next().await.unwrap().payload(), "second");
    other.resume();
    backend.notification(7, "jobs", "third").await;
    assert_eq!(other.next().await.unwrap().payload(), "third");
    assert_eq!(jobs.next().await.unwrap().payload(), "third");

    // only the last subscriber issues `UNLISTEN`
    drop(other);
    let (result, ()) = tokio::join!(jobs.unsubscribe(), listen_ok(&mut backend, "UNLISTEN \"jobs\""));
    result.unwrap();
}

#[tokio::test]
async fn reconnect_listens_again() {
    let (connector, mut backends) = common::connector();
    let policy = ReconnectPolicy::fixed(Duration::from_millis(10), None);
    let (subscriber, mut backend) = tokio::join!(
        Subscriber::builder(connector).reconnect_policy(policy).connect(),
        accept(&mut backends),
    );
    let subscriber = subscriber.unwrap();

    let (jobs, ()) = tokio::join!(subscriber.subscribe("jobs"), listen_ok(&mut backend, "LISTEN \"jobs\""));
    let mut jobs = jobs.unwrap();
    let (mail, ()) = tokio::join!(subscriber.subscribe("mail"), listen_ok(&mut backend, "LISTEN \"mail\""));
    let mut mail = mail.unwrap();

    // connection lost
    drop(backend);

    let mut backend = accept(&mut backends).await;
    let sql = backend.simple_query().await;
    let mut listened = sql.split("; ").collect::<Vec<_>>();
    listened.sort();
    assert_eq!(listened, ["LISTEN \"jobs\"", "LISTEN \"mail\""]);
    backend.command_complete("LISTEN").await;
    backend.command_complete("LISTEN").await;
    backend.ready(b'I').await;

    backend.notification(8, "mail", "after reconnect").await;
    assert_eq!(mail.next().await.unwrap().payload(), "after reconnect");

    subscriber.close();
    backend.expect(b'X').await;
    subscriber.closed().await;
    assert!(subscriber.is_closed());

    // every channel ends
    assert!(jobs.next().await.is_none());
    assert!(mail.next().await.is_none());
    assert!(subscriber.subscribe("jobs").await.is_err());
}

#[tokio::test]
async fn give_up_reconnecting() {
    let (connector, mut backends) = common::connector();
    let (subscriber, backend) = tokio::join!(
        Subscriber::builder(connector).reconnect_policy(ReconnectPolicy::never()).connect(),
        accept(&mut backends),
    );
    let subscriber = subscriber.unwrap();

    drop(backend);
    subscriber.closed().await;
    assert!(subscriber.is_closed());
}

#[tokio::test]
async fn long_channel_name_truncated() {
    let (connector, mut backends) = common::connector();
    let (subscriber, mut backend) = tokio::join!(
        Subscriber::builder(connector).connect(),
        accept(&mut backends),
    );
    let subscriber = subscriber.unwrap();

    let name = "n".repeat(80);
    let expected = format!("LISTEN \"{}\"", "n".repeat(63));
    let (channel, ()) = tokio::join!(subscriber.subscribe(&name), listen_ok(&mut backend, &expected));
    assert_eq!(channel.unwrap().name().len(), 63);
}

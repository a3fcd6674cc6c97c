mod common;

use common::{BrokenReader, Fixture, TrickleReader};
use crossbeam_channel::unbounded;
use medialink::{
    Engine, Error, FromType, Media, MediaEvent, MetaKey, ParseOptions, ParsedStatus, StreamBridge, TrackData,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PARSE_WAIT: Duration = Duration::from_secs(10);

fn engine() -> Engine {
    common::init();
    Engine::new(&["--no-video", "-sout-all"]).unwrap()
}

#[test]
fn test_create_media_from_path() {
    let engine = engine();
    let fixture = Fixture::new("Klang.wav", 1);
    let media = Media::new(&engine, fixture.path.to_str().unwrap(), FromType::FromPath).unwrap();
    assert!(!media.native_reference().is_null());
    assert!(!media.is_disposed());
    assert_eq!(media.parsed_status(), ParsedStatus::NotParsed);
    assert!(media.mrl().ends_with("Klang.wav"));
}

#[test]
fn test_create_media_fails() {
    let engine = engine();
    assert!(matches!(
        Media::new(&engine, "", FromType::FromPath),
        Err(Error::Argument(_))
    ));

    engine.dispose();
    assert!(matches!(
        Media::new(&engine, "/tmp/anything.wav", FromType::FromPath),
        Err(Error::Argument(_))
    ));
    assert!(matches!(
        Media::from_stream(&engine, StreamBridge::seekable(Cursor::new(vec![0u8; 4]))),
        Err(Error::Argument(_))
    ));
}

#[test]
fn test_release_media() {
    let engine = engine();
    let media = Media::new(&engine, "/tmp/medialink-release.wav", FromType::FromPath).unwrap();
    media.dispose();
    assert!(media.native_reference().is_null());
    media.dispose();
    assert!(media.is_disposed());
}

#[test]
fn test_create_media_from_stream() {
    let engine = engine();
    let fixture = Fixture::new("stream.wav", 1);
    let media = Media::from_stream(&engine, StreamBridge::seekable(Cursor::new(fixture.bytes()))).unwrap();
    assert!(!media.native_reference().is_null());
    assert_eq!(media.mrl(), "stream://");

    media.parse().unwrap();
    assert_eq!(media.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Done);
    assert_eq!(media.duration(), 1000);
    assert_eq!(media.tracks().len(), 1);
}

#[test]
fn test_add_option() {
    let engine = engine();
    let media = Media::new(&engine, "/tmp/medialink-option.wav", FromType::FromPath).unwrap();
    media.add_option(":no-audio").unwrap();
    assert!(matches!(media.add_option(""), Err(Error::Argument(_))));
}

#[test]
fn test_duplicate() {
    let engine = engine();
    let media = Media::new(&engine, "/tmp/medialink-duplicate.wav", FromType::FromPath).unwrap();
    let copy = media.duplicate().unwrap();
    assert_ne!(copy.native_reference(), media.native_reference());
    assert_ne!(copy.handle_id(), media.handle_id());
    assert!(!copy.native_reference().is_null());
    assert_eq!(copy.mrl(), media.mrl());
}

#[test]
fn test_duplicates_share_meta() {
    let engine = engine();
    let media = Media::new(&engine, "/tmp/medialink-shared.wav", FromType::FromPath).unwrap();
    let copy = media.duplicate().unwrap();

    media.set_meta(MetaKey::Title, "Shared").unwrap();
    assert_eq!(copy.meta(MetaKey::Title).as_deref(), Some("Shared"));

    media.dispose();
    assert!(!copy.is_disposed());
    copy.set_meta(MetaKey::Artist, "Still here").unwrap();
    assert_eq!(copy.meta(MetaKey::Title).as_deref(), Some("Shared"));
    assert_eq!(copy.meta(MetaKey::Artist).as_deref(), Some("Still here"));
}

#[test]
fn test_set_metadata() {
    let engine = engine();
    let fixture = Fixture::new("meta.wav", 1);
    let media = Media::from_path(&engine, &fixture.path).unwrap();
    assert!(media.meta(MetaKey::ShowName).is_none());

    let (tx, rx) = unbounded();
    media
        .subscribe(move |event| {
            if let MediaEvent::MetaChanged(key) = event {
                let _ = tx.send(*key);
            }
        })
        .unwrap();

    const TEST: &str = "test";
    media.set_meta(MetaKey::ShowName, TEST).unwrap();
    assert!(media.save_meta());
    assert_eq!(media.meta(MetaKey::ShowName).as_deref(), Some(TEST));
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), MetaKey::ShowName);

    // A fresh media over the same file picks the saved value up when parsed.
    let reopened = Media::from_path(&engine, &fixture.path).unwrap();
    reopened.parse().unwrap();
    assert_eq!(reopened.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Done);
    assert_eq!(reopened.meta(MetaKey::ShowName).as_deref(), Some(TEST));
}

#[test]
fn test_save_meta_on_stream_fails() {
    let engine = engine();
    let media = Media::from_stream(&engine, StreamBridge::seekable(Cursor::new(vec![0u8; 16]))).unwrap();
    media.set_meta(MetaKey::Title, "nowhere to go").unwrap();
    assert!(!media.save_meta());
    assert_eq!(media.meta(MetaKey::Title).as_deref(), Some("nowhere to go"));
}

#[test]
fn test_tracks() {
    let engine = engine();
    let fixture = Fixture::new("tracks.wav", 2);
    let media = Media::from_path(&engine, &fixture.path).unwrap();
    assert!(media.tracks().is_empty());

    media.parse().unwrap();
    assert_eq!(media.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Done);
    assert!(media.is_parsed());

    let tracks = media.tracks();
    assert_eq!(tracks.len(), 1);
    assert_eq!(
        tracks[0].data,
        TrackData::Audio {
            channels: 2,
            rate: 44_100
        }
    );
    assert_eq!(media.duration(), 2000);
}

#[test]
fn test_special_characters_in_path() {
    let engine = engine();
    let fixture = Fixture::new("Ünïcödé ✓ [1] #%.wav", 1);
    let media = Media::from_path(&engine, &fixture.path).unwrap();
    media.parse().unwrap();
    assert_eq!(media.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Done);
    assert!(media.mrl().ends_with("Ünïcödé ✓ [1] #%.wav"));
}

#[test]
fn test_parse_events_and_coalescing() {
    let engine = engine();
    let fixture = Fixture::new("events.wav", 1);
    let media = Media::from_path(&engine, &fixture.path).unwrap();

    let parsed = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = unbounded();
    let counter = Arc::clone(&parsed);
    media
        .subscribe(move |event| match event {
            MediaEvent::ParsedChanged(_) => {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            MediaEvent::DurationChanged(ms) => {
                let _ = tx.send(*ms);
            }
            _ => {}
        })
        .unwrap();

    media.parse().unwrap();
    media.parse().unwrap();
    assert_eq!(media.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Done);
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1000);

    // Terminal states stay put.
    media.parse().unwrap();
    assert!(common::wait_until(Duration::from_secs(2), || parsed.load(Ordering::SeqCst) == 1));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(parsed.load(Ordering::SeqCst), 1);
    assert_eq!(media.parsed_status(), ParsedStatus::Done);
}

#[test]
fn test_unreadable_file_fails_to_parse() {
    let engine = engine();
    let fixture = Fixture::new("real.wav", 1);
    let garbage = fixture.dir.path().join("garbage.wav");
    std::fs::write(&garbage, vec![0x5Au8; 4096]).unwrap();

    let media = Media::from_path(&engine, &garbage).unwrap();
    media.parse().unwrap();
    assert_eq!(media.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Failed);
    assert!(!media.is_parsed());
    assert!(media.tracks().is_empty());

    let missing = Media::from_path(&engine, fixture.dir.path().join("missing.wav")).unwrap();
    missing.parse().unwrap();
    assert_eq!(missing.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Failed);
}

#[test]
fn test_broken_stream_fails_to_parse() {
    let engine = engine();
    let media = Media::from_stream(&engine, StreamBridge::forward_only(BrokenReader)).unwrap();
    media.parse().unwrap();
    assert_eq!(media.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Failed);
}

#[test]
fn test_slow_stream_times_out() {
    let engine = engine();
    let media = Media::from_stream(&engine, StreamBridge::forward_only(TrickleReader)).unwrap();
    media
        .parse_with(ParseOptions {
            timeout: Some(Duration::from_millis(300)),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(media.parsed_status(), ParsedStatus::Parsing);
    assert_eq!(media.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Timeout);
}

#[test]
fn test_engine_default_parse_timeout() {
    common::init();
    let engine = Engine::new(&["--parse-timeout=200"]).unwrap();
    let media = Media::from_stream(&engine, StreamBridge::forward_only(TrickleReader)).unwrap();
    media.parse().unwrap();
    assert_eq!(media.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Timeout);
}

#[test]
fn test_dispose_during_parse_delivers_nothing() {
    let engine = engine();
    let media = Media::from_stream(&engine, StreamBridge::forward_only(TrickleReader)).unwrap();
    let copy = media.duplicate().unwrap();

    let late = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&late);
    media
        .subscribe(move |event| {
            if let MediaEvent::ParsedChanged(_) = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    media
        .parse_with(ParseOptions {
            timeout: Some(Duration::ZERO),
            ..Default::default()
        })
        .unwrap();
    thread::sleep(Duration::from_millis(150));
    media.dispose();

    // The duplicate still sees the abandoned parse.
    assert_eq!(copy.wait_for_parse(PARSE_WAIT).unwrap(), ParsedStatus::Timeout);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(late.load(Ordering::SeqCst), 0);
    assert_eq!(media.parsed_status(), ParsedStatus::NotParsed);
}

#[test]
fn test_wait_without_parse_times_out() {
    let engine = engine();
    let media = Media::new(&engine, "/tmp/medialink-never-parsed.wav", FromType::FromPath).unwrap();
    assert!(matches!(
        media.wait_for_parse(Duration::from_millis(100)),
        Err(Error::Timeout(_))
    ));
}

#[test]
fn test_unsubscribe() {
    let engine = engine();
    let media = Media::new(&engine, "/tmp/medialink-unsubscribe.wav", FromType::FromPath).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let id = media
        .subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(media.unsubscribe(id));
    assert!(!media.unsubscribe(id));

    media.set_meta(MetaKey::Genre, "Ambient").unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

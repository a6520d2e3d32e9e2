use image::DynamicImage;
use mangascroll::page::Size;
use mangascroll::{DirectorySource, ImageWorker, MemorySource, Pager, PagerConfig, PagerEvent};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(20);

fn write_pages(dir: &Path, count: usize, width: u32, height: u32) {
    for i in 1..=count {
        DynamicImage::new_rgb8(width, height)
            .save(dir.join(format!("{i}.png")))
            .unwrap();
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::new_rgb8(width, height)
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageOutputFormat::Png,
        )
        .unwrap();
    bytes
}

fn threaded_pager(viewport: Size) -> Pager<ImageWorker> {
    Pager::new(
        PagerConfig::default(),
        ImageWorker::new(2).unwrap(),
        viewport,
    )
}

#[test]
fn directory_document_scrolls_with_bounded_residency() {
    let dir = tempfile::tempdir().unwrap();
    write_pages(dir.path(), 12, 200, 300);
    let mut pager = threaded_pager(Size::new(300, 500));
    let events = pager.events();

    let count = pager
        .open(Arc::new(DirectorySource::new(dir.path(), false)), 0)
        .unwrap();
    assert_eq!(count, 12);
    assert!(pager.wait_idle(WAIT));
    let expected: Vec<u64> = (0..12).map(|i| i * 320).collect();
    assert_eq!(pager.layout().starts(), expected.as_slice());

    let max = pager.layout().max_scroll(500);
    while pager.scroll_offset() < max {
        pager.scroll_by(250.0);
        assert!(pager.wait_idle(WAIT));
        let resident = pager.resident_pages().len();
        assert!(resident <= pager.visible_pages().len() + 2);
    }
    assert_eq!(pager.current_page(), Some(10));
    assert!(pager.resident_pages().contains(&11));
    assert!(!pager.resident_pages().contains(&0));

    let seen: Vec<PagerEvent> = events.try_iter().collect();
    assert_eq!(seen.first(), Some(&PagerEvent::ImagesLoaded { count: 12 }));
    assert_eq!(seen.last(), Some(&PagerEvent::CurrentPageChanged(10)));
}

#[test]
fn narrow_viewport_gets_resized_bitmaps() {
    let source = MemorySource::new()
        .with_entry("01.png", png_bytes(400, 600))
        .with_entry("02.png", png_bytes(400, 600));
    let mut pager = threaded_pager(Size::new(200, 1000));
    pager.open(Arc::new(source), 0).unwrap();
    assert!(pager.wait_idle(WAIT));

    for page in pager.pages() {
        assert_eq!(page.scaled_size(), Size::new(200, 300));
        let display = page.bitmap().and_then(|b| b.display()).map(|d| Size::of(d));
        assert_eq!(display, Some(Size::new(200, 300)));
        let source = page.bitmap().map(|b| Size::of(b.source()));
        assert_eq!(source, Some(Size::new(400, 600)));
    }
}

#[test]
fn corrupt_page_does_not_stop_the_rest() {
    let source = MemorySource::new()
        .with_entry("1.png", png_bytes(100, 100))
        .with_entry("2.png", b"garbage".to_vec())
        .with_entry("3.png", png_bytes(100, 100));
    let mut pager = threaded_pager(Size::new(300, 1000));
    pager.open(Arc::new(source), 0).unwrap();
    assert!(pager.wait_idle(WAIT));

    assert!(pager.page(1).unwrap().is_failed());
    assert_eq!(pager.page(1).unwrap().scaled_size(), Size::new(100, 100));
    assert_eq!(pager.resident_pages(), vec![0, 2]);
    assert_eq!(pager.layout().starts(), &[0, 120, 240]);
}

#[test]
fn switching_documents_discards_replies_for_the_old_one() {
    let mut big = MemorySource::new();
    for i in 0..6 {
        big.insert(format!("{i}.png"), png_bytes(120, 80));
    }
    let small = MemorySource::new().with_entry("only.png", png_bytes(50, 70));

    let mut pager = threaded_pager(Size::new(300, 1000));
    pager.open(Arc::new(big), 0).unwrap();
    pager.open(Arc::new(small), 0).unwrap();
    assert!(pager.wait_idle(WAIT));
    std::thread::sleep(Duration::from_millis(50));
    pager.process_replies();

    assert_eq!(pager.page_count(), 1);
    assert_eq!(
        pager.page(0).unwrap().intrinsic_size(),
        Some(Size::new(50, 70))
    );
    assert_eq!(pager.layout().starts(), &[0]);
}

#[test]
fn start_page_stays_in_place_while_sizes_arrive() {
    let dir = tempfile::tempdir().unwrap();
    write_pages(dir.path(), 8, 200, 300);
    let mut pager = threaded_pager(Size::new(300, 500));
    pager
        .open(Arc::new(DirectorySource::new(dir.path(), false)), 4)
        .unwrap();
    assert!(pager.wait_idle(WAIT));
    assert_eq!(pager.current_page(), Some(4));
    assert_eq!(pager.scroll_offset(), pager.layout().start(4).unwrap() as f64);
}

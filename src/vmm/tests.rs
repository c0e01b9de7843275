use std::{fs::OpenOptions, sync::Arc, thread, time::Duration};

use serial_test::serial;
use swap_store::SwapError;

use super::*;
use crate::{
    events::{ContentSource, VmEvent},
    section::{Program, Section, SectionError},
};

const PAGE: usize = 64;

fn setup(swap_file: &str, frames: usize) -> Arc<VirtualMemoryManager<PAGE>> {
    let _ = env_logger::builder().is_test(true).try_init();
    VirtualMemoryManager::init(
        VmConfig::default()
            .frames(frames)
            .swap_file(swap_file)
            .record_events(true),
    )
    .unwrap()
}

fn no_sections() -> Arc<dyn SectionProvider> {
    Arc::new(Program::<PAGE>::new(0))
}

struct BrokenImage;

impl SectionProvider for BrokenImage {
    fn section_count(&self) -> usize {
        1
    }

    fn first_vpn(&self, _section: usize) -> usize {
        0
    }

    fn length_in_pages(&self, _section: usize) -> usize {
        1
    }

    fn is_read_only(&self, _section: usize) -> bool {
        false
    }

    fn load_page(&self, section: usize, page: usize, _: &mut [u8]) -> Result<(), SectionError> {
        Err(SectionError::Load {
            section,
            page,
            reason: String::from("truncated image"),
        })
    }

    fn entry_point(&self) -> usize {
        0
    }
}

fn write(vmm: &VirtualMemoryManager<PAGE>, page: PageId, byte: u8) -> Result<(), VmError> {
    vmm.access(page, 0, Access::Write(&[byte; PAGE]))
}

fn read(vmm: &VirtualMemoryManager<PAGE>, page: PageId) -> Result<Vec<u8>, VmError> {
    let mut buf = vec![0; PAGE];
    vmm.access(page, 0, Access::Read(&mut buf))?;
    Ok(buf)
}

#[test]
#[serial]
fn zero_fill_fault_installs_mapping() {
    let vmm = setup("vmm_zero_fill", 2);
    let space = vmm.create_space(2, no_sections());
    let page = PageId::new(space, 1);

    let resolution = vmm.handle_fault(page).unwrap();
    assert_eq!(
        resolution,
        FaultResolution::Loaded {
            frame: 0,
            source: ContentSource::ZeroFill
        }
    );
    let entry = vmm.entry(page).unwrap();
    assert!(entry.valid && entry.used && !entry.dirty && !entry.read_only);
    assert_eq!(entry.ppn, 0);
    assert_eq!(vmm.frame_owners(), vec![Some(page), None]);
    assert_eq!(
        vmm.events().drain(),
        vec![
            VmEvent::FaultStarted { page },
            VmEvent::ZeroFill { page },
            VmEvent::FaultResolved {
                page,
                frame: 0,
                source: Some(ContentSource::ZeroFill)
            },
        ]
    );

    assert_eq!(
        vmm.handle_fault(page).unwrap(),
        FaultResolution::AlreadyValid { frame: 0 }
    );
}

#[test]
#[serial]
fn section_pages_carry_their_flags() {
    let vmm = setup("vmm_section", 2);
    let program = Program::<PAGE>::new(0)
        .with_section(Section::new("code", 0, 1, true).with_bytes(vec![0x11; PAGE]))
        .with_section(Section::new("data", 1, 1, false).with_bytes(vec![0x22; PAGE]));
    let space = vmm.create_space(3, Arc::new(program));

    assert_eq!(read(&vmm, PageId::new(space, 0)).unwrap(), vec![0x11; PAGE]);
    assert!(vmm.entry(PageId::new(space, 0)).unwrap().read_only);
    assert_eq!(read(&vmm, PageId::new(space, 1)).unwrap(), vec![0x22; PAGE]);
    assert!(!vmm.entry(PageId::new(space, 1)).unwrap().read_only);

    assert!(matches!(
        write(&vmm, PageId::new(space, 0), 0xFF),
        Err(VmError::ReadOnlyViolation { vpn: 0 })
    ));
    assert_eq!(read(&vmm, PageId::new(space, 0)).unwrap(), vec![0x11; PAGE]);
    assert_eq!(vmm.stats().section_loads, 2);
}

#[test]
#[serial]
fn out_of_range_fault_fails() {
    let vmm = setup("vmm_out_of_range", 1);
    let space = vmm.create_space(1, no_sections());
    let page = PageId::new(space, 1);

    assert!(matches!(
        vmm.handle_fault(page),
        Err(VmError::InvalidAddress { vpn: 1 })
    ));
    let events = vmm.events().drain();
    assert!(matches!(events.last(), Some(VmEvent::FaultFailed { .. })));
    assert_eq!(vmm.free_frames(), 1);

    assert!(matches!(
        vmm.handle_fault(PageId::new(space + 1, 0)),
        Err(VmError::UnknownAddressSpace)
    ));
}

#[test]
#[serial]
fn clean_victim_is_dropped_without_swap() {
    let vmm = setup("vmm_clean_victim", 1);
    let space = vmm.create_space(2, no_sections());

    read(&vmm, PageId::new(space, 0)).unwrap();
    read(&vmm, PageId::new(space, 1)).unwrap();

    assert_eq!(vmm.swap().bound_slot_count(), 0);
    let stats = vmm.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.swap_skipped_clean, 1);
    assert_eq!(stats.swap_writes, 0);
    assert!(!vmm.entry(PageId::new(space, 0)).unwrap().valid);
}

#[test]
#[serial]
fn dirty_victim_is_written_to_swap() {
    let vmm = setup("vmm_dirty_victim", 1);
    let space = vmm.create_space(2, no_sections());
    let vpn0 = PageId::new(space, 0);
    let vpn1 = PageId::new(space, 1);

    write(&vmm, vpn0, 0xAA).unwrap();
    assert!(vmm.entry(vpn0).unwrap().dirty);
    vmm.events().drain();

    read(&vmm, vpn1).unwrap();
    assert_eq!(
        vmm.events().drain(),
        vec![
            VmEvent::FaultStarted { page: vpn1 },
            VmEvent::EvictionChosen {
                frame: 0,
                victim: vpn0,
                dirty: true
            },
            VmEvent::SwapWrite {
                page: vpn0,
                slot: 0
            },
            VmEvent::ZeroFill { page: vpn1 },
            VmEvent::FaultResolved {
                page: vpn1,
                frame: 0,
                source: Some(ContentSource::ZeroFill)
            },
        ]
    );
    let victim = vmm.entry(vpn0).unwrap();
    assert!(!victim.valid && !victim.dirty);

    assert_eq!(read(&vmm, vpn0).unwrap(), vec![0xAA; PAGE]);
    assert!(vmm
        .events()
        .drain()
        .contains(&VmEvent::SwapRead { page: vpn0, slot: 0 }));
}

#[test]
#[serial]
fn clock_clears_used_bits_in_entries() {
    let vmm = setup("vmm_used_bits", 2);
    let space = vmm.create_space(3, no_sections());

    vmm.handle_fault(PageId::new(space, 0)).unwrap();
    vmm.handle_fault(PageId::new(space, 1)).unwrap();
    vmm.handle_fault(PageId::new(space, 2)).unwrap();

    assert!(!vmm.entry(PageId::new(space, 0)).unwrap().valid);
    let survivor = vmm.entry(PageId::new(space, 1)).unwrap();
    assert!(survivor.valid && !survivor.used);
    assert!(vmm.entry(PageId::new(space, 2)).unwrap().used);
}

#[test]
#[serial]
fn all_frames_pinned_is_out_of_frames() {
    let vmm = setup("vmm_all_pinned", 2);
    let space = vmm.create_space(3, no_sections());
    vmm.handle_fault(PageId::new(space, 0)).unwrap();
    vmm.handle_fault(PageId::new(space, 1)).unwrap();

    let leases = {
        let mut state = vmm.state.lock().unwrap();
        vec![state.frames.pin(0).unwrap(), state.frames.pin(1).unwrap()]
    };
    assert!(matches!(
        vmm.handle_fault(PageId::new(space, 2)),
        Err(VmError::OutOfFrames)
    ));
    assert!(vmm.entry(PageId::new(space, 0)).unwrap().valid);
    assert!(vmm.entry(PageId::new(space, 1)).unwrap().valid);

    {
        let mut state = vmm.state.lock().unwrap();
        for lease in leases {
            vmm.pins.unpin(&mut *state, lease);
        }
    }
    assert!(vmm.handle_fault(PageId::new(space, 2)).is_ok());
}

#[test]
#[serial]
fn failed_swap_out_restores_the_victim() {
    let vmm = setup("vmm_swap_out_failure", 1);
    let space = vmm.create_space(2, no_sections());
    let vpn0 = PageId::new(space, 0);
    let vpn1 = PageId::new(space, 1);

    write(&vmm, vpn0, 0xAA).unwrap();
    vmm.swap().close().unwrap();

    assert!(matches!(
        read(&vmm, vpn1),
        Err(VmError::Io(SwapError::Closed))
    ));
    let victim = vmm.entry(vpn0).unwrap();
    assert!(victim.valid && victim.dirty);
    assert_eq!(victim.ppn, 0);
    assert!(!vmm.entry(vpn1).unwrap().valid);
    assert_eq!(vmm.frame_owners(), vec![Some(vpn0)]);
    {
        let state = vmm.state.lock().unwrap();
        assert_eq!(state.frames.pinned_count(), 0);
        assert!(state.in_flight.is_empty());
    }
    assert_eq!(read(&vmm, vpn0).unwrap(), vec![0xAA; PAGE]);
}

#[test]
#[serial]
fn failed_section_load_frees_the_frame() {
    let vmm = setup("vmm_section_failure", 1);
    let space = vmm.create_space(1, Arc::new(BrokenImage));

    assert!(matches!(
        vmm.handle_fault(PageId::new(space, 0)),
        Err(VmError::Section(SectionError::Load { .. }))
    ));
    assert_eq!(vmm.free_frames(), 1);
    assert_eq!(vmm.frame_owners(), vec![None]);
    assert!(!vmm.entry(PageId::new(space, 0)).unwrap().valid);
    let state = vmm.state.lock().unwrap();
    assert_eq!(state.frames.pinned_count(), 0);
    assert!(state.in_flight.is_empty());
}

#[test]
#[serial]
fn swapped_out_page_fails_after_close() {
    let vmm = setup("vmm_closed_swap_in", 1);
    let space = vmm.create_space(2, no_sections());
    let vpn0 = PageId::new(space, 0);
    let vpn1 = PageId::new(space, 1);

    write(&vmm, vpn0, 0xAA).unwrap();
    read(&vmm, vpn1).unwrap();
    assert_eq!(vmm.swap().slot_of(&vpn0), Some(0));
    vmm.swap().close().unwrap();

    assert!(matches!(
        vmm.handle_fault(vpn0),
        Err(VmError::Io(SwapError::Closed))
    ));
    assert!(!vmm.entry(vpn0).unwrap().valid);
    assert!(!vmm.entry(vpn1).unwrap().valid);
    assert_eq!(vmm.free_frames(), 1);
    assert_eq!(vmm.frame_owners(), vec![None]);
    let state = vmm.state.lock().unwrap();
    assert_eq!(state.frames.pinned_count(), 0);
    assert!(state.in_flight.is_empty());
}

#[test]
#[serial]
fn failed_swap_in_frees_the_frame() {
    let vmm = setup("vmm_swap_in_failure", 1);
    let space = vmm.create_space(2, no_sections());
    let vpn0 = PageId::new(space, 0);
    let vpn1 = PageId::new(space, 1);

    write(&vmm, vpn0, 0xAA).unwrap();
    read(&vmm, vpn1).unwrap();
    vmm.events().drain();
    OpenOptions::new()
        .write(true)
        .open("DISK_IMAGE_vmm_swap_in_failure")
        .unwrap()
        .set_len(0)
        .unwrap();

    assert!(matches!(read(&vmm, vpn0), Err(VmError::Io(SwapError::Disk(_)))));
    assert!(!vmm.entry(vpn0).unwrap().valid);
    assert_eq!(vmm.free_frames(), 1);
    assert_eq!(vmm.frame_owners(), vec![None]);
    assert!(matches!(
        vmm.events().drain().last(),
        Some(VmEvent::FaultFailed { page, .. }) if *page == vpn0
    ));
    {
        let state = vmm.state.lock().unwrap();
        assert_eq!(state.frames.pinned_count(), 0);
        assert!(state.in_flight.is_empty());
    }
    assert_eq!(vmm.swap().slot_of(&vpn0), Some(0));
}

#[test]
#[serial]
fn fault_waits_for_page_in_flight() {
    let vmm = setup("vmm_in_flight", 2);
    let space = vmm.create_space(1, no_sections());
    let page = PageId::new(space, 0);
    vmm.state.lock().unwrap().in_flight.insert(page, 1);

    let faulter = {
        let vmm = vmm.clone();
        thread::spawn(move || vmm.handle_fault(page))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!faulter.is_finished());

    vmm.state.lock().unwrap().in_flight.remove(&page);
    vmm.pins.notify();
    let resolution = faulter.join().unwrap().unwrap();
    assert!(matches!(
        resolution,
        FaultResolution::Loaded {
            source: ContentSource::ZeroFill,
            ..
        }
    ));
}

#[test]
#[serial]
fn destroy_returns_frames_and_slots() {
    let vmm = setup("vmm_destroy", 2);
    let space = vmm.create_space(4, no_sections());
    for vpn in 0..4 {
        write(&vmm, PageId::new(space, vpn), vpn as u8).unwrap();
    }
    assert_eq!(vmm.swap().bound_slot_count(), 2);
    assert_eq!(vmm.free_frames(), 0);

    vmm.destroy_space(space).unwrap();
    assert_eq!(vmm.free_frames(), 2);
    assert_eq!(vmm.swap().bound_slot_count(), 0);
    assert_eq!(vmm.swap().free_slot_count(), 2);
    assert_eq!(vmm.frame_owners(), vec![None, None]);
    assert!(matches!(
        vmm.destroy_space(space),
        Err(VmError::UnknownAddressSpace)
    ));
}

#[test]
#[serial]
fn shutdown_is_idempotent() {
    let vmm = setup("vmm_shutdown", 1);
    vmm.shutdown().unwrap();
    vmm.shutdown().unwrap();
    let space = vmm.create_space(2, no_sections());
    write(&vmm, PageId::new(space, 0), 1).unwrap();
    assert!(matches!(
        write(&vmm, PageId::new(space, 1), 2),
        Err(VmError::Io(SwapError::Closed))
    ));
}

//! Executable sections: the content source for pages that are neither swapped
//! out nor zero-filled.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionError {
    NoSuchSection(usize),
    PageOutOfRange { section: usize, page: usize },
    IncorrectPageSize(usize),
    /// The provider could not produce the page.
    Load { section: usize, page: usize, reason: String },
}

impl fmt::Display for SectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionError::NoSuchSection(section) => write!(f, "no section {}", section),
            SectionError::PageOutOfRange { section, page } => {
                write!(f, "section {} has no page {}", section, page)
            }
            SectionError::IncorrectPageSize(len) => {
                write!(f, "destination of {} bytes is not one page", len)
            }
            SectionError::Load {
                section,
                page,
                reason,
            } => write!(f, "loading page {} of section {}: {}", page, section, reason),
        }
    }
}

impl std::error::Error for SectionError {}

/// What the loader knows about a program image.
///
/// Sections are indexed `0..section_count()`. A provider is shared by every
/// address space running the program, so it must be usable from any thread.
pub trait SectionProvider: Send + Sync {
    fn section_count(&self) -> usize;

    fn first_vpn(&self, section: usize) -> usize;

    fn length_in_pages(&self, section: usize) -> usize;

    fn is_read_only(&self, section: usize) -> bool;

    /// Fills `destination` (exactly one page) with page `page` of `section`.
    fn load_page(
        &self,
        section: usize,
        page: usize,
        destination: &mut [u8],
    ) -> Result<(), SectionError>;

    /// Virtual address of the first instruction.
    fn entry_point(&self) -> usize;

    /// The section covering `vpn` and the page's index inside it.
    fn find_section(&self, vpn: usize) -> Option<(usize, usize)> {
        (0..self.section_count()).find_map(|section| {
            let first = self.first_vpn(section);
            let len = self.length_in_pages(section);
            (vpn >= first && vpn < first + len).then(|| (section, vpn - first))
        })
    }

    /// Pages covered by all sections.
    fn total_pages(&self) -> usize {
        (0..self.section_count())
            .map(|section| self.length_in_pages(section))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub first_vpn: usize,
    pub num_pages: usize,
    pub read_only: bool,
    /// Initialized bytes. Anything past them up to `num_pages` is zero.
    pub bytes: Vec<u8>,
}

impl Section {
    pub fn new(name: &str, first_vpn: usize, num_pages: usize, read_only: bool) -> Self {
        Self {
            name: String::from(name),
            first_vpn,
            num_pages,
            read_only,
            bytes: Vec::new(),
        }
    }

    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = bytes;
        self
    }
}

/// An in-memory program image.
#[derive(Debug, Clone, Default)]
pub struct Program<const PAGE_SIZE: usize> {
    sections: Vec<Section>,
    entry_point: usize,
}

impl<const PAGE_SIZE: usize> Program<PAGE_SIZE> {
    pub fn new(entry_point: usize) -> Self {
        Self {
            sections: Vec::new(),
            entry_point,
        }
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// A program with `code_pages` read-only pages whose bytes encode their own
    /// page number, followed by `data_pages` writable pages of `0xDA`.
    pub fn synthetic(code_pages: usize, data_pages: usize) -> Self {
        let code = (0..code_pages * PAGE_SIZE)
            .map(|offset| (offset / PAGE_SIZE) as u8 ^ 0x5A)
            .collect();
        Self::new(0)
            .with_section(Section::new(".text", 0, code_pages, true).with_bytes(code))
            .with_section(
                Section::new(".data", code_pages, data_pages, false)
                    .with_bytes(vec![0xDA; data_pages * PAGE_SIZE]),
            )
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn section(&self, section: usize) -> Result<&Section, SectionError> {
        self.sections
            .get(section)
            .ok_or(SectionError::NoSuchSection(section))
    }
}

impl<const PAGE_SIZE: usize> SectionProvider for Program<PAGE_SIZE> {
    fn section_count(&self) -> usize {
        self.sections.len()
    }

    fn first_vpn(&self, section: usize) -> usize {
        self.sections.get(section).map_or(0, |s| s.first_vpn)
    }

    fn length_in_pages(&self, section: usize) -> usize {
        self.sections.get(section).map_or(0, |s| s.num_pages)
    }

    fn is_read_only(&self, section: usize) -> bool {
        self.sections.get(section).map_or(false, |s| s.read_only)
    }

    fn load_page(
        &self,
        section: usize,
        page: usize,
        destination: &mut [u8],
    ) -> Result<(), SectionError> {
        if destination.len() != PAGE_SIZE {
            return Err(SectionError::IncorrectPageSize(destination.len()));
        }
        let s = self.section(section)?;
        if page >= s.num_pages {
            return Err(SectionError::PageOutOfRange { section, page });
        }

        let start = (page * PAGE_SIZE).min(s.bytes.len());
        let end = ((page + 1) * PAGE_SIZE).min(s.bytes.len());
        let initialized = &s.bytes[start..end];
        destination[..initialized.len()].copy_from_slice(initialized);
        destination[initialized.len()..].fill(0);
        Ok(())
    }

    fn entry_point(&self) -> usize {
        self.entry_point
    }
}

use x86_64::structures::paging::Page;

/// Invalidation of cached translations after a page-table change.
pub trait Tlb {
    fn invalidate(&self, page: Page);
}

/// The translation cache of the one CPU this kernel runs on.
///
/// Single core, so a local `invlpg` is the whole shootdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTlb;

impl Tlb for LocalTlb {
    fn invalidate(&self, page: Page) {
        #[cfg(target_arch = "x86_64")]
        x86_64::instructions::tlb::flush(page.start_address());
        #[cfg(not(target_arch = "x86_64"))]
        let _ = page;
    }
}

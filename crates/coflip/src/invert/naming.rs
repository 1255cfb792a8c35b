use rustc_hash::FxHashSet;

use crate::ident::Ident;

/// Picks `base`, then `base1`, `base2`, ... until the name is not in `taken`.
pub fn fresh_ident(base: &str, taken: &FxHashSet<Ident>) -> Ident {
    let mut candidate = Ident::new(base);
    let mut suffix = 0u64;
    while taken.contains(&candidate) {
        suffix += 1;
        candidate = Ident::new(&format!("{}{}", base, suffix));
    }
    candidate
}

//! Per-context instance profile.
//!
//! The profile decides which instances of each instance domain a fetch
//! returns. Every InDom is either in "include all, except listed" or in
//! "exclude all, except listed" state; InDoms without their own entry follow
//! the global state.

use std::collections::BTreeMap;

use super::ids::InDom;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndomProfile {
    /// `true`: include everything except `instances`.
    /// `false`: exclude everything except `instances`.
    pub include: bool,
    pub instances: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceProfile {
    include_all: bool,
    indoms: BTreeMap<InDom, IndomProfile>,
    generation: u64,
}

impl Default for InstanceProfile {
    fn default() -> Self {
        Self {
            include_all: true,
            indoms: BTreeMap::new(),
            generation: 0,
        }
    }
}

impl InstanceProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a profile from its transmitted form.
    pub fn from_parts(include_all: bool, indoms: Vec<(InDom, IndomProfile)>) -> Self {
        Self {
            include_all,
            indoms: indoms.into_iter().collect(),
            generation: 0,
        }
    }

    /// Bumped on every change; lets senders detect a stale copy.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn include_all(&self) -> bool {
        self.include_all
    }

    pub fn entries(&self) -> impl Iterator<Item = (InDom, &IndomProfile)> {
        self.indoms.iter().map(|(indom, p)| (*indom, p))
    }

    /// Adds instances to the profile.
    ///
    /// An empty list selects every instance of `indom`; `InDom::NULL` with an
    /// empty list resets the whole profile to "include everything".
    pub fn add(&mut self, indom: InDom, instances: &[i32]) {
        self.generation += 1;
        if instances.is_empty() {
            if indom.is_null() {
                self.include_all = true;
                self.indoms.clear();
            } else {
                self.indoms.insert(
                    indom,
                    IndomProfile {
                        include: true,
                        instances: Vec::new(),
                    },
                );
            }
            return;
        }

        let global = self.include_all;
        let entry = self.indoms.entry(indom).or_insert_with(|| IndomProfile {
            include: global,
            instances: Vec::new(),
        });
        if entry.include {
            entry.instances.retain(|i| !instances.contains(i));
        } else {
            for inst in instances {
                if !entry.instances.contains(inst) {
                    entry.instances.push(*inst);
                }
            }
        }
    }

    /// Removes instances from the profile.
    ///
    /// An empty list drops every instance of `indom`; `InDom::NULL` with an
    /// empty list switches the whole profile to "exclude everything".
    pub fn delete(&mut self, indom: InDom, instances: &[i32]) {
        self.generation += 1;
        if instances.is_empty() {
            if indom.is_null() {
                self.include_all = false;
                self.indoms.clear();
            } else {
                self.indoms.insert(
                    indom,
                    IndomProfile {
                        include: false,
                        instances: Vec::new(),
                    },
                );
            }
            return;
        }

        let global = self.include_all;
        let entry = self.indoms.entry(indom).or_insert_with(|| IndomProfile {
            include: global,
            instances: Vec::new(),
        });
        if entry.include {
            for inst in instances {
                if !entry.instances.contains(inst) {
                    entry.instances.push(*inst);
                }
            }
        } else {
            entry.instances.retain(|i| !instances.contains(i));
        }
    }

    pub fn is_included(&self, indom: InDom, inst: i32) -> bool {
        if indom.is_null() {
            return true;
        }
        match self.indoms.get(&indom) {
            Some(p) if p.include => !p.instances.contains(&inst),
            Some(p) => p.instances.contains(&inst),
            None => self.include_all,
        }
    }
}

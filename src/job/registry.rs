use super::{Job, JobId};

/// Refers to a job slot. A handle goes stale once its job is removed, even
/// if the slot is reused later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    job: Option<Job>,
}

/// Arena of live jobs owned by whoever runs the transport.
#[derive(Debug, Default)]
pub struct JobRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Job) -> JobHandle {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.job = Some(job);
            return JobHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            job: Some(job),
        });
        JobHandle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: JobHandle) -> Option<&Job> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.job.as_ref())
    }

    pub fn get_mut(&mut self, handle: JobHandle) -> Option<&mut Job> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.job.as_mut())
    }

    pub fn remove(&mut self, handle: JobHandle) -> Option<Job> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let job = slot.job.take()?;

        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(job)
    }

    pub fn find(&self, id: JobId) -> Option<JobHandle> {
        self.iter()
            .find(|(_, job)| job.id() == id)
            .map(|(handle, _)| handle)
    }

    pub fn handles(&self) -> Vec<JobHandle> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobHandle, &Job)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.job.as_ref().map(|job| {
                (
                    JobHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    job,
                )
            })
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 * References:
 *    https://www.kernel.org/doc/html/latest/networking/can.html#broadcast-manager-message-sequence-transmission
 *
*/
use crate::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a set of frames is turned into BCM TX tasks.
///
/// Independent: one task per frame, each addressed and removable by its own id.
/// Sequence: one task sending the frames in order, addressed only by the id
/// of the first frame. Other members' ids do not address anything.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CyclicStrategy {
    Independent,
    Sequence,
}

/// `count` frames every `short_interval`, then every `long_interval` forever.
/// count=0 skips the first phase.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CyclicSchedule {
    pub count: u32,
    pub short_interval: BcmTimeval,
    pub long_interval: BcmTimeval,
}

impl CyclicSchedule {
    pub fn new(count: u32, short_interval: BcmTimeval, long_interval: BcmTimeval) -> Self {
        CyclicSchedule {
            count,
            short_interval,
            long_interval,
        }
    }

    pub fn every(long_interval: BcmTimeval) -> Self {
        Self::new(0, BcmTimeval::ZERO, long_interval)
    }
}

/// What the caller keeps to later update or delete a live task.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CyclicTask {
    canid: SockCanId,
    variant: CanVariant,
    strategy: CyclicStrategy,
    members: Vec<SockCanId>,
}

impl CyclicTask {
    /// addressing id, the only one the broadcast manager knows the task by
    pub fn get_id(&self) -> SockCanId {
        self.canid
    }

    pub fn get_variant(&self) -> CanVariant {
        self.variant
    }

    pub fn get_strategy(&self) -> CyclicStrategy {
        self.strategy
    }

    /// ids of every frame the task transmits, addressing id first
    pub fn get_members(&self) -> &[SockCanId] {
        &self.members
    }

    fn check_address(&self, canid: SockCanId) -> Result<(), BcmError> {
        if canid == self.canid {
            return Ok(());
        }
        let info = if self.members.contains(&canid) {
            format!(
                "canid:{:#x} belongs to sequence task {:#x}, use the first frame id",
                canid, self.canid
            )
        } else {
            format!("canid:{:#x} does not address task {:#x}", canid, self.canid)
        };
        Err(BcmError::new(BcmErrorKind::UnknownTask, info))
    }

    /// TX_DELETE for this task. `canid` must be the addressing id.
    pub fn delete(&self, canid: SockCanId) -> Result<Vec<u8>, BcmError> {
        self.check_address(canid)?;
        encode_cyclic_delete(self.variant, self.canid)
    }

    /// New content for the task, timers untouched. For a sequence the
    /// replacement starts with the addressing frame.
    pub fn update(&self, frames: &[CanAnyFrame], announce: bool) -> Result<Vec<u8>, BcmError> {
        match frames.first() {
            None => Err(BcmError::new(BcmErrorKind::EncodingError, "empty task update")),
            Some(frame) => {
                self.check_address(frame.get_id())?;
                if self.strategy == CyclicStrategy::Independent && frames.len() > 1 {
                    return Err(BcmError::new(
                        BcmErrorKind::EncodingError,
                        format!("independent task {:#x} carries one frame, got {}", self.canid, frames.len()),
                    ));
                }
                encode_cyclic_update(self.variant, frames, announce)
            }
        }
    }
}

/// Messages to send plus the task handles they create.
#[derive(Clone, Debug)]
pub struct CyclicPlan {
    messages: Vec<Vec<u8>>,
    tasks: Vec<CyclicTask>,
}

impl CyclicPlan {
    pub fn get_messages(&self) -> &[Vec<u8>] {
        &self.messages
    }

    pub fn get_tasks(&self) -> &[CyclicTask] {
        &self.tasks
    }

    pub fn into_parts(self) -> (Vec<Vec<u8>>, Vec<CyclicTask>) {
        (self.messages, self.tasks)
    }

    pub fn apply<T>(&self, sock: &mut T) -> Result<(), BcmError>
    where
        T: BcmTransport + ?Sized,
    {
        sock.send_all(&self.messages)
    }
}

pub fn plan_independent(
    variant: CanVariant,
    frames: &[CanAnyFrame],
    schedules: &[CyclicSchedule],
) -> Result<CyclicPlan, BcmError> {
    let counts: Vec<u32> = schedules.iter().map(|schedule| schedule.count).collect();
    let short: Vec<BcmTimeval> = schedules.iter().map(|schedule| schedule.short_interval).collect();
    let long: Vec<BcmTimeval> = schedules.iter().map(|schedule| schedule.long_interval).collect();

    let messages = encode_cyclic_setup_independent(variant, frames, &counts, &short, &long)?;
    let tasks = frames
        .iter()
        .map(|frame| CyclicTask {
            canid: frame.get_id(),
            variant,
            strategy: CyclicStrategy::Independent,
            members: vec![frame.get_id()],
        })
        .collect();
    Ok(CyclicPlan { messages, tasks })
}

pub fn plan_sequence(
    variant: CanVariant,
    frames: &[CanAnyFrame],
    schedule: CyclicSchedule,
) -> Result<CyclicPlan, BcmError> {
    let message = encode_cyclic_setup_sequence(
        variant,
        frames,
        schedule.count,
        schedule.short_interval,
        schedule.long_interval,
    )?;
    // encode checked frames is not empty
    let task = CyclicTask {
        canid: frames[0].get_id(),
        variant,
        strategy: CyclicStrategy::Sequence,
        members: frames.iter().map(|frame| frame.get_id()).collect(),
    };
    Ok(CyclicPlan {
        messages: vec![message],
        tasks: vec![task],
    })
}

/// Local view of what lives in the broadcast manager for one socket. Tasks
/// and filters are keyed by addressing id and variant, the kernel keeps
/// classic and FD operations apart.
#[derive(Debug, Default)]
pub struct CyclicRegistry {
    tasks: HashMap<(SockCanId, CanVariant), CyclicTask>,
    filters: HashMap<(SockCanId, CanVariant), RxFilter>,
}

impl CyclicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends every plan message and records a task once its TX_SETUP went out.
    pub fn install<T>(&mut self, sock: &mut T, plan: &CyclicPlan) -> Result<&mut Self, BcmError>
    where
        T: BcmTransport + ?Sized,
    {
        for (message, task) in plan.get_messages().iter().zip(plan.get_tasks()) {
            sock.send(message)?;
            self.register_task(task.clone());
        }
        Ok(self)
    }

    /// Records the plan tasks without sending, for callers applying the plan themselves.
    pub fn register(&mut self, plan: &CyclicPlan) -> &mut Self {
        for task in plan.get_tasks() {
            self.register_task(task.clone());
        }
        self
    }

    fn register_task(&mut self, task: CyclicTask) {
        let key = (task.get_id(), task.get_variant());
        let strategy = task.get_strategy();
        if let Some(previous) = self.tasks.insert(key, task) {
            log::warn!(
                "bcm task {:#x} replaced ({:?} -> {:?})",
                previous.get_id(),
                previous.get_strategy(),
                strategy
            );
        }
    }

    pub fn get_task(&self, variant: CanVariant, canid: SockCanId) -> Option<&CyclicTask> {
        self.tasks.get(&(canid, variant))
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn unknown_task(&self, variant: CanVariant, canid: SockCanId) -> BcmError {
        let owner = self
            .tasks
            .values()
            .find(|task| task.get_variant() == variant && task.get_members().contains(&canid));
        match owner {
            Some(task) => BcmError::new(
                BcmErrorKind::UnknownTask,
                format!(
                    "canid:{:#x} belongs to sequence task {:#x}, use the first frame id",
                    canid,
                    task.get_id()
                ),
            ),
            None => BcmError::new(
                BcmErrorKind::UnknownTask,
                format!("no {:?} task addressed by canid:{:#x}", variant, canid),
            ),
        }
    }

    /// Validated TX_DELETE, the task is forgotten only once the message is sent.
    pub fn delete_task<T>(&mut self, sock: &mut T, variant: CanVariant, canid: SockCanId) -> Result<(), BcmError>
    where
        T: BcmTransport + ?Sized,
    {
        let buffer = match self.tasks.get(&(canid, variant)) {
            Some(task) => task.delete(canid)?,
            None => return Err(self.unknown_task(variant, canid)),
        };
        sock.send(&buffer)?;
        self.tasks.remove(&(canid, variant));
        Ok(())
    }

    /// Validated content update, members follow the new frames once sent.
    pub fn update_task<T>(
        &mut self,
        sock: &mut T,
        variant: CanVariant,
        frames: &[CanAnyFrame],
        announce: bool,
    ) -> Result<(), BcmError>
    where
        T: BcmTransport + ?Sized,
    {
        let canid = match frames.first() {
            Some(frame) => frame.get_id(),
            None => return Err(BcmError::new(BcmErrorKind::EncodingError, "empty task update")),
        };
        let buffer = match self.tasks.get(&(canid, variant)) {
            Some(task) => task.update(frames, announce)?,
            None => return Err(self.unknown_task(variant, canid)),
        };
        sock.send(&buffer)?;
        if let Some(task) = self.tasks.get_mut(&(canid, variant)) {
            task.members = frames.iter().map(|frame| frame.get_id()).collect();
        }
        Ok(())
    }

    /// Validated RX_SETUP, the filter is recorded under its id once sent.
    pub fn add_filter<T>(&mut self, sock: &mut T, variant: CanVariant, filter: RxFilter) -> Result<(), BcmError>
    where
        T: BcmTransport + ?Sized,
    {
        let buffer = filter.encode(variant)?;
        sock.send(&buffer)?;
        self.filters.insert((filter.get_id(), variant), filter);
        Ok(())
    }

    pub fn get_filter(&self, variant: CanVariant, canid: SockCanId) -> Option<&RxFilter> {
        self.filters.get(&(canid, variant))
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn delete_filter<T>(&mut self, sock: &mut T, variant: CanVariant, canid: SockCanId) -> Result<(), BcmError>
    where
        T: BcmTransport + ?Sized,
    {
        if !self.filters.contains_key(&(canid, variant)) {
            return Err(BcmError::new(
                BcmErrorKind::UnknownTask,
                format!("no {:?} rx filter on canid:{:#x}", variant, canid),
            ));
        }
        sock.send(&encode_rx_filter_delete(variant, canid)?)?;
        self.filters.remove(&(canid, variant));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames() -> Vec<CanAnyFrame> {
        vec![
            CanAnyFrame::new(CanVariant::Classic, 0x123, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap(),
            CanAnyFrame::new(CanVariant::Classic, 0x345, &[0xC0, 0xFF, 0xEE]).unwrap(),
        ]
    }

    fn schedule() -> CyclicSchedule {
        CyclicSchedule::new(10, BcmTimeval::new(0, 500), BcmTimeval::new(1, 0))
    }

    #[test]
    fn independent_plan_keeps_every_id() {
        let plan = plan_independent(CanVariant::Classic, &frames(), &[schedule(), schedule()]).unwrap();
        assert_eq!(plan.get_messages().len(), 2);
        let ids: Vec<SockCanId> = plan.get_tasks().iter().map(|task| task.get_id()).collect();
        assert_eq!(ids, vec![0x123, 0x345]);
        assert!(plan.get_tasks()[1].delete(0x345).is_ok());
    }

    #[test]
    fn sequence_plan_collapses_identity() {
        let plan = plan_sequence(CanVariant::Classic, &frames(), schedule()).unwrap();
        assert_eq!(plan.get_messages().len(), 1);
        let task = &plan.get_tasks()[0];
        assert_eq!(task.get_id(), 0x123);
        assert_eq!(task.get_members(), &[0x123, 0x345]);

        let error = task.delete(0x345).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::UnknownTask);
        assert!(error.get_info().contains("0x123"));

        let buffer = task.delete(0x123).unwrap();
        let head = BcmMsgHead::from_bytes(&buffer).unwrap();
        assert_eq!(head.opcode, CanBcmOpCode::TxDelete);
        assert_eq!(head.can_id, 0x123);
    }

    #[test]
    fn task_update_rules() {
        let plan = plan_independent(CanVariant::Classic, &frames(), &[schedule(), schedule()]).unwrap();
        let task = &plan.get_tasks()[0];
        assert!(task.update(&frames()[..1], false).is_ok());
        assert_eq!(task.update(&frames(), false).unwrap_err().get_kind(), BcmErrorKind::EncodingError);
        assert_eq!(task.update(&frames()[1..], false).unwrap_err().get_kind(), BcmErrorKind::UnknownTask);
    }

    #[test]
    fn registry_validates_delete() {
        let mut sock = BcmLoopback::new();
        let mut registry = CyclicRegistry::new();
        registry
            .install(&mut sock, &plan_sequence(CanVariant::Classic, &frames(), schedule()).unwrap())
            .unwrap();
        assert_eq!(registry.task_count(), 1);
        assert_eq!(sock.take_sent().len(), 1);

        let error = registry.delete_task(&mut sock, CanVariant::Classic, 0x345).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::UnknownTask);
        assert!(error.get_info().contains("sequence task 0x123"));

        // same id, other variant: not the same kernel operation
        assert!(registry.delete_task(&mut sock, CanVariant::Fd, 0x123).is_err());
        assert_eq!(sock.pending(), 0);
        assert!(sock.get_sent().is_empty());

        registry.delete_task(&mut sock, CanVariant::Classic, 0x123).unwrap();
        assert_eq!(sock.get_sent().len(), 1);
        assert_eq!(sock.get_sent()[0].len(), BCM_HEAD_SIZE);
        assert_eq!(registry.task_count(), 0);
        assert!(registry.delete_task(&mut sock, CanVariant::Classic, 0x123).is_err());
    }

    #[test]
    fn registry_update_and_filters() {
        let mut sock = BcmLoopback::new();
        let mut registry = CyclicRegistry::new();
        registry.register(&plan_sequence(CanVariant::Classic, &frames(), schedule()).unwrap());

        let mut replacement = frames();
        replacement.reverse();
        let error = registry.update_task(&mut sock, CanVariant::Classic, &replacement, true).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::UnknownTask);
        registry.update_task(&mut sock, CanVariant::Classic, &frames()[..1], true).unwrap();
        assert_eq!(registry.get_task(CanVariant::Classic, 0x123).unwrap().get_members(), &[0x123]);
        assert_eq!(sock.take_sent().len(), 1);

        let mut filter = RxFilter::new(0x444);
        filter.set_mask(&[0xFF]);
        registry.add_filter(&mut sock, CanVariant::Classic, filter).unwrap();
        assert_eq!(sock.get_sent()[0].len(), BCM_HEAD_SIZE + CAN_FRAME_SIZE);
        assert_eq!(registry.filter_count(), 1);
        assert_eq!(registry.get_filter(CanVariant::Classic, 0x444).unwrap().get_mask(), Some(&[0xFFu8][..]));

        registry.delete_filter(&mut sock, CanVariant::Classic, 0x444).unwrap();
        assert_eq!(registry.filter_count(), 0);
        let error = registry.delete_filter(&mut sock, CanVariant::Classic, 0x444).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::UnknownTask);
    }

    #[test]
    fn registry_keeps_state_when_send_fails() {
        let mut sock = BcmLoopback::new();
        let mut registry = CyclicRegistry::new();
        registry
            .install(&mut sock, &plan_independent(CanVariant::Classic, &frames(), &[schedule(), schedule()]).unwrap())
            .unwrap();
        let mut filter = RxFilter::new(0x444);
        filter.set_mask(&[0xFF]);
        registry.add_filter(&mut sock, CanVariant::Classic, filter).unwrap();
        sock.close();

        let error = registry.delete_task(&mut sock, CanVariant::Classic, 0x123).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::TransportError);
        assert_eq!(registry.task_count(), 2);
        assert!(registry.get_task(CanVariant::Classic, 0x123).is_some());

        let mut other = RxFilter::new(0x555);
        other.set_mask(&[0x0F]);
        let error = registry.add_filter(&mut sock, CanVariant::Classic, other).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::TransportError);
        assert!(registry.get_filter(CanVariant::Classic, 0x555).is_none());

        let error = registry.delete_filter(&mut sock, CanVariant::Classic, 0x444).unwrap_err();
        assert_eq!(error.get_kind(), BcmErrorKind::TransportError);
        assert_eq!(registry.filter_count(), 1);

        // a retry on a working socket still finds the task
        let mut sock = BcmLoopback::new();
        registry.delete_task(&mut sock, CanVariant::Classic, 0x123).unwrap();
        assert_eq!(registry.task_count(), 1);
    }

    #[test]
    fn install_stops_at_first_failed_send() {
        let mut sock = BcmLoopback::new();
        sock.close();
        let mut registry = CyclicRegistry::new();
        let plan = plan_independent(CanVariant::Classic, &frames(), &[schedule(), schedule()]).unwrap();
        assert!(registry.install(&mut sock, &plan).is_err());
        assert_eq!(registry.task_count(), 0);
    }

    #[test]
    fn plan_applies_every_message() {
        let mut sock = BcmLoopback::new();
        let plan = plan_independent(CanVariant::Classic, &frames(), &[schedule(), schedule()]).unwrap();
        plan.apply(&mut sock).unwrap();
        assert_eq!(sock.get_sent(), plan.get_messages());
    }
}

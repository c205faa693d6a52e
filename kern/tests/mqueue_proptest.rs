// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Round-trip law: a message queue delivers whatever was sent, in order,
//! under an arbitrary interleaving of sends and receives, as long as the
//! ring is never asked to hold more than its capacity at once.

use abi::{IosResult, MessageFlags, ProcessId};
use kern::mqueue::MessageQueue;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

#[derive(Copy, Clone, Debug)]
enum Op {
    Send(u32),
    Receive,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u32>().prop_map(Op::Send), Just(Op::Receive),]
}

fn run(capacity: usize, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut queue = MessageQueue::new(ProcessId(1), capacity);
    let mut model = std::collections::VecDeque::new();

    for op in ops {
        match op {
            Op::Send(msg) => {
                if queue.is_full() {
                    continue;
                }
                let sent: IosResult<Option<()>> = queue.try_send(msg, false, MessageFlags::empty());
                prop_assert_eq!(sent, Ok(Some(())));
                model.push_back(msg);
            }
            Op::Receive => {
                let received = queue.try_receive(MessageFlags::NON_BLOCKING);
                match model.pop_front() {
                    Some(expected) => prop_assert_eq!(received, Ok(Some(expected))),
                    None => prop_assert!(received.is_err()),
                }
            }
        }
    }

    prop_assert_eq!(queue.count(), model.len());
    Ok(())
}

proptest! {
    #[test]
    fn fifo_order_survives_randomized_interleaving(
        capacity in 1usize..8,
        ops in proptest::collection::vec(op_strategy(), 0..64),
    ) {
        run(capacity, ops)?;
    }
}

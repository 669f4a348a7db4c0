//! 电梯排序
//!
//! 按 (方向, 设备, 扇区) 升序插入：读在写前，同方向内按位置排列，
//! 已下发的链表头不参与排序。

use super::{Request, RequestTable};

#[inline]
fn in_order(a: &Request, b: &Request) -> bool {
    (a.cmd, a.dev, a.sector) <= (b.cmd, b.dev, b.sector)
}

/// 把 `slot` 插到 `head` 之后第一个后继比它大的位置
pub(super) fn insert(table: &mut RequestTable, head: usize, slot: usize) {
    let mut prev = head;
    while let Some(next) = table.get(prev).next {
        if !in_order(table.get(next), table.get(slot)) {
            break;
        }
        prev = next;
    }
    table.get_mut(slot).next = table.get(prev).next;
    table.get_mut(prev).next = Some(slot);
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::super::tests::request;
    use super::super::{Command, RequestTable};

    const MAJOR: u8 = 3;

    fn submit(table: &mut RequestTable, cmd: Command, sector: u64) {
        let slot = table.alloc(request(cmd, sector)).ok().unwrap();
        table.add(MAJOR, slot);
    }

    fn order(table: &RequestTable) -> Vec<(Command, u64)> {
        table.pending(MAJOR).map(|req| (req.cmd, req.sector)).collect()
    }

    #[test]
    fn reads_overtake_writes() {
        let mut table = RequestTable::new();
        submit(&mut table, Command::Write, 500);
        submit(&mut table, Command::Write, 14);
        submit(&mut table, Command::Read, 14);
        assert_eq!(
            vec![
                (Command::Write, 500),
                (Command::Read, 14),
                (Command::Write, 14)
            ],
            order(&table)
        );
    }

    #[test]
    fn ascending_within_direction() {
        let mut table = RequestTable::new();
        submit(&mut table, Command::Read, 0);
        for sector in [40, 20, 60, 20, 10] {
            submit(&mut table, Command::Read, sector);
        }
        for sector in [30, 4] {
            submit(&mut table, Command::Write, sector);
        }
        assert_eq!(
            vec![
                (Command::Read, 0),
                (Command::Read, 10),
                (Command::Read, 20),
                (Command::Read, 20),
                (Command::Read, 40),
                (Command::Read, 60),
                (Command::Write, 4),
                (Command::Write, 30)
            ],
            order(&table)
        );
    }

    #[test]
    fn head_is_never_moved() {
        let mut table = RequestTable::new();
        submit(&mut table, Command::Write, 90);
        submit(&mut table, Command::Read, 2);
        submit(&mut table, Command::Read, 1);
        assert_eq!((Command::Write, 90), order(&table)[0]);
        assert_eq!((Command::Read, 1), order(&table)[1]);
    }
}

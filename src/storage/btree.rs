use std::fmt::Write as _;
use std::path::Path;

use log::{debug, info};

use crate::error::{DbError, DbResult};
use crate::storage::page::{
    Child, InternalNode, Node, NodeBody, CHILDREN_PER_INTERNAL, LEAF_SPLIT_LEFT_COUNT,
    LEAF_SPLIT_RIGHT_COUNT, ROWS_PER_LEAF,
};
use crate::storage::pager::Pager;
use crate::storage::row::Row;

/// The root never moves: page 0 holds it for the lifetime of the file.
const ROOT_PAGE_NUM: u32 = 0;

/// A single-table B+ tree bound to one pager. Rows are keyed by their
/// `i32` id; leaves are linked in ascending key order for scans.
pub struct Table {
    root_page: u32,
    pager: Pager,
}

/// A position in the table: `(page, cell)` plus an end-of-scan marker.
/// Doubles as the insertion point returned by `find`.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub page_num: u32,
    pub cell_num: usize,
    pub end_of_table: bool,
}

/// Shape summary produced by `check_tree`.
#[derive(Debug, PartialEq, Eq)]
pub struct TreeInfo {
    pub depth: usize,
    pub leaf_rows: Vec<usize>,
    pub total_rows: usize,
}

// Copies of node content taken so the pager borrow can be released before
// descending further.
enum SubtreeShape {
    Leaf { keys: Vec<i32> },
    Internal { children: Vec<Child>, rightmost: u32 },
}

impl Table {
    /// Open (or create) the table stored at `path`. A fresh file gets an
    /// empty leaf root at page 0.
    pub fn open(path: &Path) -> DbResult<Table> {
        let mut pager = Pager::open(path)?;
        if pager.num_pages() == 0 {
            pager.get_page(ROOT_PAGE_NUM, true)?;
        }
        info!("opened {} ({} pages)", path.display(), pager.num_pages());
        Ok(Table {
            root_page: ROOT_PAGE_NUM,
            pager,
        })
    }

    /// Flush every resident page and give up the table.
    pub fn close(mut self) -> DbResult<()> {
        info!("closing table, {} pages resident", self.pager.num_pages());
        self.pager.flush()
    }

    fn node(&mut self, page_num: u32) -> DbResult<&mut Node> {
        self.pager
            .get_page(page_num, false)?
            .ok_or(DbError::RowNotFound)
    }

    /// Descend from the root to the leaf that covers `key`. The cursor
    /// points at the leftmost cell whose key is `>= key`: an equal-key hit
    /// if present, the insertion point otherwise.
    pub fn find(&mut self, key: i32) -> DbResult<Cursor> {
        let mut page_num = self.root_page;
        loop {
            let node = self.node(page_num)?;
            match &node.body {
                NodeBody::Leaf(leaf) => {
                    return Ok(Cursor {
                        page_num,
                        cell_num: leaf.find_cell(key),
                        end_of_table: false,
                    });
                }
                NodeBody::Internal(internal) => page_num = internal.child_page(key),
            }
        }
    }

    /// Point lookup: the row with exactly `key`, if present.
    pub fn find_row(&mut self, key: i32) -> DbResult<Option<Row>> {
        let cursor = self.find(key)?;
        let leaf = self.node(cursor.page_num)?.leaf();
        if cursor.cell_num < leaf.num_cells && leaf.cells[cursor.cell_num].id == key {
            Ok(Some(leaf.cells[cursor.cell_num]))
        } else {
            Ok(None)
        }
    }

    /// Insert one row at its key-ordered position, splitting the target
    /// leaf if it is already full.
    pub fn insert_row(&mut self, row: Row) -> DbResult<()> {
        let cursor = self.find(row.id)?;
        self.leaf_insert(&cursor, row)
    }

    fn leaf_insert(&mut self, cursor: &Cursor, row: Row) -> DbResult<()> {
        let (num_cells, is_root, parent, old_max) = {
            let node = self.node(cursor.page_num)?;
            let leaf = node.leaf();
            (leaf.num_cells, node.is_root, node.parent, leaf.max_key())
        };
        if num_cells >= ROWS_PER_LEAF {
            return self.leaf_split_insert(cursor, row);
        }

        {
            let leaf = self.node(cursor.page_num)?.leaf_mut();
            for i in (cursor.cell_num..num_cells).rev() {
                leaf.cells[i + 1] = leaf.cells[i];
            }
            leaf.cells[cursor.cell_num] = row;
            leaf.num_cells = num_cells + 1;
        }

        // Appending at the high end raises this leaf's maximum; the pivot
        // tracking it in the parent must follow. A leaf reached through
        // the parent's rightmost pointer has no pivot.
        if cursor.cell_num == num_cells && !is_root {
            let parent_node = self.node(parent)?.internal_mut();
            let idx = parent_node.find_child(old_max);
            if idx < parent_node.num_keys {
                parent_node.children[idx].key = row.id;
            }
        }
        Ok(())
    }

    /// Split a full leaf around its median and insert `row` into whichever
    /// half owns its slot, then push the new division up to the parent.
    fn leaf_split_insert(&mut self, cursor: &Cursor, row: Row) -> DbResult<()> {
        let right_page = self.pager.get_new_page_num();
        self.pager.get_page(right_page, true)?;

        let (old_cells, old_sibling, was_root, parent) = {
            let node = self.node(cursor.page_num)?;
            let leaf = node.leaf();
            (leaf.cells, leaf.sibling, node.is_root, node.parent)
        };
        let old_left_max = old_cells[ROWS_PER_LEAF - 1].id;

        // Distribute the ROWS_PER_LEAF + 1 logical rows: the lower half
        // stays, the upper half moves to the new leaf.
        let mut left = [Row::default(); ROWS_PER_LEAF];
        let mut right = [Row::default(); ROWS_PER_LEAF];
        for i in 0..=ROWS_PER_LEAF {
            let source = if i == cursor.cell_num {
                row
            } else if i > cursor.cell_num {
                old_cells[i - 1]
            } else {
                old_cells[i]
            };
            let at = i % LEAF_SPLIT_LEFT_COUNT;
            if i >= LEAF_SPLIT_LEFT_COUNT {
                right[at] = source;
            } else {
                left[at] = source;
            }
        }
        let new_left_max = left[LEAF_SPLIT_LEFT_COUNT - 1].id;
        let new_right_max = right[LEAF_SPLIT_RIGHT_COUNT - 1].id;
        debug!(
            "split leaf {}: keys <= {} stay, new leaf {} takes the rest",
            cursor.page_num, new_left_max, right_page
        );

        {
            let leaf = self.node(cursor.page_num)?.leaf_mut();
            leaf.cells = left;
            leaf.num_cells = LEAF_SPLIT_LEFT_COUNT;
            leaf.sibling = right_page;
        }
        {
            let node = self.node(right_page)?;
            node.parent = parent;
            let leaf = node.leaf_mut();
            leaf.cells = right;
            leaf.num_cells = LEAF_SPLIT_RIGHT_COUNT;
            leaf.sibling = old_sibling;
        }

        if was_root {
            return self.create_new_root(right_page);
        }

        let parent_node = self.node(parent)?.internal_mut();
        assert!(
            parent_node.num_keys < CHILDREN_PER_INTERNAL,
            "internal node split is not implemented"
        );
        if old_sibling == 0 {
            // The split leaf was the rightmost child: it gains a pivot and
            // the new leaf takes over the rightmost slot.
            let n = parent_node.num_keys;
            parent_node.children[n] = Child {
                key: new_left_max,
                page_num: cursor.page_num,
            };
            parent_node.num_keys = n + 1;
            parent_node.rightmost_child = right_page;
        } else {
            let idx = parent_node.find_child(old_left_max);
            parent_node.children[idx].key = new_left_max;
            for i in (idx + 1..parent_node.num_keys).rev() {
                parent_node.children[i + 1] = parent_node.children[i];
            }
            parent_node.children[idx + 1] = Child {
                key: new_right_max,
                page_num: right_page,
            };
            parent_node.num_keys += 1;
        }
        Ok(())
    }

    /// The root leaf has split: move its rows out to a fresh left child
    /// and re-purpose page 0 as an internal node over the two halves, so
    /// the root's page index never changes.
    fn create_new_root(&mut self, right_child_page: u32) -> DbResult<()> {
        let root_page = self.root_page;
        let left_child_page = self.pager.get_new_page_num();
        self.pager.get_page(left_child_page, true)?;
        debug!(
            "root split: leaves {} and {} under internal root {}",
            left_child_page, right_child_page, root_page
        );

        let root_leaf = self.node(root_page)?.leaf().clone();
        let left_max = root_leaf.max_key();

        {
            let node = self.node(left_child_page)?;
            node.is_root = false;
            node.parent = root_page;
            let leaf = node.leaf_mut();
            *leaf = root_leaf;
            leaf.sibling = right_child_page;
        }
        {
            let node = self.node(root_page)?;
            let mut internal = InternalNode::new();
            internal.num_keys = 1;
            internal.children[0] = Child {
                key: left_max,
                page_num: left_child_page,
            };
            internal.rightmost_child = right_child_page;
            node.body = NodeBody::Internal(internal);
            node.parent = 0;
        }
        {
            let node = self.node(right_child_page)?;
            node.parent = root_page;
            node.leaf_mut().sibling = 0;
        }
        Ok(())
    }

    /// Cursor at the first row in key order (the leftmost leaf's cell 0).
    pub fn table_start(&mut self) -> DbResult<Cursor> {
        let mut page_num = self.root_page;
        loop {
            let node = self.node(page_num)?;
            match &node.body {
                NodeBody::Leaf(leaf) => {
                    return Ok(Cursor {
                        page_num,
                        cell_num: 0,
                        end_of_table: leaf.num_cells == 0,
                    });
                }
                NodeBody::Internal(internal) => {
                    assert!(internal.num_keys > 0, "internal node without children");
                    page_num = internal.children[0].page_num;
                }
            }
        }
    }

    /// Step the cursor one row forward, following the sibling link when
    /// the current leaf is exhausted.
    pub fn advance(&mut self, cursor: &mut Cursor) -> DbResult<()> {
        let leaf = self.node(cursor.page_num)?.leaf();
        cursor.cell_num += 1;
        if cursor.cell_num >= leaf.num_cells {
            if leaf.sibling == 0 {
                cursor.end_of_table = true;
            } else {
                cursor.page_num = leaf.sibling;
                cursor.cell_num = 0;
            }
        }
        Ok(())
    }

    pub fn row_at(&mut self, cursor: &Cursor) -> DbResult<Row> {
        let leaf = self.node(cursor.page_num)?.leaf();
        Ok(leaf.cells[cursor.cell_num])
    }

    /// Every row in ascending key order.
    pub fn select_all(&mut self) -> DbResult<Vec<Row>> {
        let mut rows = Vec::new();
        let mut cursor = self.table_start()?;
        while !cursor.end_of_table {
            rows.push(self.row_at(&cursor)?);
            self.advance(&mut cursor)?;
        }
        Ok(rows)
    }

    /// Walk the whole tree and verify its structural invariants: cell and
    /// pivot ordering, pivot keys equal to child subtree maxima, parent
    /// back-pointers, uniform leaf depth, and a sibling chain that visits
    /// every leaf exactly once in order. Violations abort.
    pub fn check_tree(&mut self) -> DbResult<TreeInfo> {
        let mut leaves = Vec::new();
        let (_, depth) = self.verify_subtree(self.root_page, 0, true, &mut leaves)?;

        let mut leaf_rows = Vec::with_capacity(leaves.len());
        for i in 0..leaves.len() {
            let expected_sibling = if i + 1 < leaves.len() { leaves[i + 1] } else { 0 };
            let leaf = self.node(leaves[i])?.leaf();
            assert_eq!(
                leaf.sibling, expected_sibling,
                "sibling chain must follow leaf order"
            );
            leaf_rows.push(leaf.num_cells);
        }
        let total_rows = leaf_rows.iter().sum();
        Ok(TreeInfo {
            depth,
            leaf_rows,
            total_rows,
        })
    }

    fn verify_subtree(
        &mut self,
        page_num: u32,
        expected_parent: u32,
        expect_root: bool,
        leaves: &mut Vec<u32>,
    ) -> DbResult<(i32, usize)> {
        let shape = {
            let node = self.node(page_num)?;
            assert_eq!(node.page_num, page_num, "page numbered by its slot");
            assert_eq!(node.is_root, expect_root, "exactly one root at page 0");
            if !expect_root {
                assert_eq!(node.parent, expected_parent, "parent back-pointer");
            }
            match &node.body {
                NodeBody::Leaf(leaf) => SubtreeShape::Leaf {
                    keys: leaf.cells[..leaf.num_cells].iter().map(|r| r.id).collect(),
                },
                NodeBody::Internal(internal) => SubtreeShape::Internal {
                    children: internal.children[..internal.num_keys].to_vec(),
                    rightmost: internal.rightmost_child,
                },
            }
        };

        match shape {
            SubtreeShape::Leaf { keys } => {
                assert!(keys.len() <= ROWS_PER_LEAF);
                for pair in keys.windows(2) {
                    assert!(pair[0] < pair[1], "leaf keys strictly ascending");
                }
                leaves.push(page_num);
                Ok((keys.last().copied().unwrap_or(0), 1))
            }
            SubtreeShape::Internal {
                children,
                rightmost,
            } => {
                assert!(!children.is_empty(), "internal node without children");
                for pair in children.windows(2) {
                    assert!(pair[0].key < pair[1].key, "pivot keys strictly ascending");
                }
                let mut child_depth = 0;
                for child in &children {
                    let (max, d) = self.verify_subtree(child.page_num, page_num, false, leaves)?;
                    assert_eq!(max, child.key, "pivot key equals child subtree max");
                    if child_depth == 0 {
                        child_depth = d;
                    } else {
                        assert_eq!(d, child_depth, "all leaves at the same depth");
                    }
                }
                let (max, d) = self.verify_subtree(rightmost, page_num, false, leaves)?;
                assert_eq!(d, child_depth, "all leaves at the same depth");
                assert!(
                    max > children[children.len() - 1].key,
                    "rightmost child keys exceed every pivot"
                );
                Ok((max, child_depth + 1))
            }
        }
    }

    /// Indented sketch of the tree for the shell's `.btree` command.
    pub fn dump_tree(&mut self) -> DbResult<String> {
        let mut out = String::new();
        self.dump_node(self.root_page, 0, &mut out)?;
        Ok(out)
    }

    fn dump_node(&mut self, page_num: u32, indent: usize, out: &mut String) -> DbResult<()> {
        let shape = {
            let node = self.node(page_num)?;
            match &node.body {
                NodeBody::Leaf(leaf) => SubtreeShape::Leaf {
                    keys: leaf.cells[..leaf.num_cells].iter().map(|r| r.id).collect(),
                },
                NodeBody::Internal(internal) => SubtreeShape::Internal {
                    children: internal.children[..internal.num_keys].to_vec(),
                    rightmost: internal.rightmost_child,
                },
            }
        };
        let pad = "  ".repeat(indent);
        match shape {
            SubtreeShape::Leaf { keys } => {
                let _ = writeln!(out, "{}- leaf (size {})", pad, keys.len());
                for key in keys {
                    let _ = writeln!(out, "{}  - {}", pad, key);
                }
            }
            SubtreeShape::Internal {
                children,
                rightmost,
            } => {
                let _ = writeln!(out, "{}- internal (size {})", pad, children.len());
                for child in children {
                    self.dump_node(child.page_num, indent + 1, out)?;
                    let _ = writeln!(out, "{}- key {}", pad, child.key);
                }
                self.dump_node(rightmost, indent + 1, out)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn open_fresh(filename: &str) -> Table {
        let _ = fs::remove_file(filename);
        Table::open(Path::new(filename)).unwrap()
    }

    fn sample_row(id: i32) -> Row {
        let name = format!("name-{{{}}}", id);
        let email = format!("{}@example.com", name);
        Row::new(id, &name, &email).unwrap()
    }

    #[test]
    fn single_leaf_keeps_rows_sorted() {
        let filename = "test_btree_sorted.db";
        let mut table = open_fresh(filename);
        for id in [5, 1, 3, 2, 4] {
            table.insert_row(sample_row(id)).unwrap();
        }
        let ids: Vec<i32> = table.select_all().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        let info = table.check_tree().unwrap();
        assert_eq!(info.depth, 1);
        assert_eq!(info.leaf_rows, vec![5]);
        let _ = fs::remove_file(filename);
    }

    #[test]
    fn first_split_promotes_a_new_root() {
        let filename = "test_btree_first_split.db";
        let mut table = open_fresh(filename);
        for id in 0..=13 {
            table.insert_row(sample_row(id)).unwrap();
        }

        let info = table.check_tree().unwrap();
        assert_eq!(info.depth, 2);
        assert_eq!(info.leaf_rows, vec![7, 7]);
        assert_eq!(info.total_rows, 14);

        let root = table.node(0).unwrap();
        assert!(root.is_root);
        let internal = root.internal().clone();
        assert_eq!(internal.num_keys, 1);
        assert_eq!(internal.children[0].key, 6);

        let ids: Vec<i32> = table.select_all().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, (0..=13).collect::<Vec<_>>());
        let _ = fs::remove_file(filename);
    }

    #[test]
    fn scattered_inserts_keep_invariants() {
        let filename = "test_btree_scattered.db";
        let mut table = open_fresh(filename);
        let mut ids = vec![
            2, 10, 11, 3, 5, 7, 1, 4, 8, 6, 9, 0, 15, 14, 1000, 12, 10000, 9000, 8000, 7000, 6000,
            5000, 4000, 44, 45, 46, 47, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57,
        ];
        for &id in &ids {
            table.insert_row(sample_row(id)).unwrap();
            table.check_tree().unwrap();
        }

        ids.sort_unstable();
        let got: Vec<i32> = table.select_all().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(got, ids);
        let _ = fs::remove_file(filename);
    }

    #[test]
    fn find_row_hits_and_misses() {
        let filename = "test_btree_find.db";
        let mut table = open_fresh(filename);
        for id in 0..=20 {
            table.insert_row(sample_row(id * 2)).unwrap();
        }
        let hit = table.find_row(18).unwrap().unwrap();
        assert_eq!(hit.id, 18);
        assert_eq!(hit.name_str(), "name-{18}");
        assert!(table.find_row(19).unwrap().is_none());
        assert!(table.find_row(-1).unwrap().is_none());
        assert!(table.find_row(1000).unwrap().is_none());
        let _ = fs::remove_file(filename);
    }

    #[test]
    fn dump_tree_sketches_the_shape() {
        let filename = "test_btree_dump.db";
        let mut table = open_fresh(filename);
        for id in 0..=13 {
            table.insert_row(sample_row(id)).unwrap();
        }
        let dump = table.dump_tree().unwrap();
        assert!(dump.starts_with("- internal (size 1)"));
        assert!(dump.contains("- key 6"));
        assert_eq!(dump.matches("- leaf (size 7)").count(), 2);
        let _ = fs::remove_file(filename);
    }
}

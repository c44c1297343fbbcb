//! Export of partitions for visual inspection.

use std::path::Path;

use itertools::iproduct;
use vtkio::model::{
    Attribute, Attributes, ByteOrder, CellType, Cells, DataArray, DataSet, ElementType, IOBuffer,
    Piece, UnstructuredGridPiece, Version, VertexNumbers, Vtk,
};

use crate::{
    error::BalanceError, geometry::TileBox, partition::RectPartition, rank_grid::RankGrid,
};

// Corner offsets of a VTK hexahedron, bottom face first.
const HEX_CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Export a partition as a legacy ASCII VTK file.
///
/// Every rank becomes one hexahedron spanning its owned cells. The cell data
/// holds the linear rank and, if given, the workload of each rank in linear
/// rank order.
pub fn export_partition_to_vtk<P: AsRef<Path>>(
    partition: &RectPartition,
    workloads: Option<&[u64]>,
    path: P,
) -> Result<(), BalanceError> {
    let ranks = partition.ranks_per_dim();
    let grid = RankGrid::new(ranks)?;
    let nranks = grid.nranks();

    if let Some(workloads) = workloads {
        if workloads.len() != nranks {
            return Err(BalanceError::Vtk(format!(
                "expected {} workloads, found {}",
                nranks,
                workloads.len()
            )));
        }
    }

    let boxes = (0..nranks)
        .map(|rank| partition.owned_box(grid.cartesian_coords(rank)))
        .collect::<Vec<_>>();

    let mut cell_data = vec![Attribute::DataArray(DataArray {
        name: String::from("rank"),
        elem: ElementType::Scalars {
            num_comp: 1,
            lookup_table: None,
        },
        data: IOBuffer::U64((0..nranks as u64).collect()),
    })];

    if let Some(workloads) = workloads {
        cell_data.push(Attribute::DataArray(DataArray {
            name: String::from("workload"),
            elem: ElementType::Scalars {
                num_comp: 1,
                lookup_table: None,
            },
            data: IOBuffer::U64(workloads.to_vec()),
        }));
    }

    write_boxes(
        &boxes,
        cell_data,
        format!("Partition over {:?} ranks", ranks),
        path.as_ref(),
    )
}

/// Per-tile workload of a global grid as a legacy ASCII VTK file.
///
/// One hexahedron per tile with a non-zero workload, in cell coordinates.
pub fn export_workload_to_vtk<P: AsRef<Path>>(
    workload: &[u64],
    tiles_per_dim: [usize; 3],
    path: P,
) -> Result<(), BalanceError> {
    let tiles = iproduct!(0..tiles_per_dim[0], 0..tiles_per_dim[1], 0..tiles_per_dim[2])
        .zip(workload)
        .filter(|(_, &w)| w > 0)
        .map(|((i, j, k), &w)| ([i, j, k], w))
        .collect::<Vec<_>>();

    let boxes = tiles
        .iter()
        .map(|(tile, _)| TileBox::single(*tile))
        .collect::<Vec<_>>();

    let cell_data = vec![Attribute::DataArray(DataArray {
        name: String::from("workload"),
        elem: ElementType::Scalars {
            num_comp: 1,
            lookup_table: None,
        },
        data: IOBuffer::U64(tiles.iter().map(|(_, w)| *w).collect()),
    })];

    write_boxes(
        &boxes,
        cell_data,
        format!("Workload over {:?} tiles", tiles_per_dim),
        path.as_ref(),
    )
}

// Write one hexahedron per box, in cell coordinates.
fn write_boxes(
    boxes: &[TileBox],
    cell_data: Vec<Attribute>,
    title: String,
    path: &Path,
) -> Result<(), BalanceError> {
    let mut points = Vec::<f64>::with_capacity(3 * 8 * boxes.len());
    let mut vertices = Vec::<u32>::with_capacity(9 * boxes.len());

    for (n, tile_box) in boxes.iter().enumerate() {
        let (lower, upper) = tile_box.to_cells();

        vertices.push(8);
        for (index, corner) in HEX_CORNERS.iter().enumerate() {
            for d in 0..3 {
                let bound = if corner[d] == 0 { lower[d] } else { upper[d] };
                points.push(bound as f64);
            }
            vertices.push((8 * n + index) as u32);
        }
    }

    let vtk = Vtk {
        version: Version { major: 4, minor: 1 },
        title,
        byte_order: ByteOrder::BigEndian,
        file_path: None,
        data: DataSet::UnstructuredGrid {
            meta: None,
            pieces: vec![Piece::Inline(Box::new(UnstructuredGridPiece {
                points: IOBuffer::F64(points),
                cells: Cells {
                    cell_verts: VertexNumbers::Legacy {
                        num_cells: boxes.len() as u32,
                        vertices,
                    },
                    types: vec![CellType::Hexahedron; boxes.len()],
                },
                data: Attributes {
                    point: vec![],
                    cell: cell_data,
                },
            }))],
        },
    };

    vtk.export_ascii(path)
        .map_err(|err| BalanceError::Vtk(format!("{:?}", err)))
}

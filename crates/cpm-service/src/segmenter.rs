//! Packing perceived objects into MTU-bounded messages.
//!
//! [`Segmenter::segment`] first tries a single message holding every record
//! and the sensor information container. Only when that does not fit does
//! it fall back to the segmented layout:
//!
//! 1. records are sorted ascending by [`PerceivedObject::priority`] and
//!    taken from the back, so the highest priorities land in the first
//!    segment;
//! 2. a segment is closed at [`MAX_OBJECTS_PER_SEGMENT`] records or when the
//!    next record would push it past the MTU;
//! 3. the sensor information container joins the first segment with room
//!    left for it, or gets a segment of its own at the end;
//! 4. segments beyond [`MAX_SEGMENTS`] are dropped and logged;
//! 5. segments are numbered from 1 and stamped with the final total.
//!
//! Records travel with a caller-chosen key so the caller learns exactly
//! which objects made it into a kept segment.

use crate::codec::CpmCodec;
use cpm_types::message::{
    CollectivePerceptionMessage, PerceivedObject, SegmentInfo, SensorInformation, MAX_OBJECTS_PER_SEGMENT,
    MAX_SEGMENTS,
};
use cpm_types::CpmError;
use tracing::{debug, error};

/// Outcome of [`Segmenter::segment`].
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation<K> {
    /// Ready to validate and send, in transmission order.
    pub messages: Vec<CollectivePerceptionMessage>,
    /// Keys of the records contained in `messages`.
    pub included: Vec<K>,
    /// Segment number carrying the sensor information container; `1` for an
    /// unsegmented message.
    pub sensor_information_segment: Option<u8>,
    /// Records lost with segments beyond [`MAX_SEGMENTS`].
    pub dropped_records: usize,
}

pub struct Segmenter<'a> {
    codec: &'a dyn CpmCodec,
    mtu: usize,
}

impl<'a> Segmenter<'a> {
    pub fn new(codec: &'a dyn CpmCodec, mtu: usize) -> Self {
        Self { codec, mtu }
    }

    /// Distribute `records` and the optional `sensor_information` over as
    /// many copies of `template` as needed.
    ///
    /// `template` must carry no perceived objects, no sensor information and
    /// no segment info. Fails with [`CpmError::ExceedsMtu`] when a single
    /// record, the sensor information container or the bare template cannot
    /// fit into one message.
    pub fn segment<K: Copy>(
        &self,
        template: &CollectivePerceptionMessage,
        mut records: Vec<(K, PerceivedObject)>,
        sensor_information: Option<Vec<SensorInformation>>,
    ) -> Result<Segmentation<K>, CpmError> {
        if records.len() <= MAX_OBJECTS_PER_SEGMENT {
            let mut single = template.clone();
            single.sensor_information = sensor_information.clone();
            single.perceived_objects = records.iter().map(|(_, r)| r.clone()).collect();
            let size = self.codec.encoded_size(&single);
            if size <= self.mtu {
                debug!(objects = records.len(), size, "single CPM");
                let sensor_information_segment = single.sensor_information.as_ref().map(|_| 1);
                return Ok(Segmentation {
                    messages: vec![single],
                    included: records.into_iter().map(|(k, _)| k).collect(),
                    sensor_information_segment,
                    dropped_records: 0,
                });
            }
        }

        // Highest priority last; it is popped first.
        records.sort_by_key(|(_, r)| r.priority());

        let mut segments: Vec<(CollectivePerceptionMessage, Vec<K>)> = Vec::new();
        let mut pending_sic = sensor_information;
        let mut sic_segment = None;

        while !records.is_empty() {
            let mut segment = self.segment_template(template);
            let mut keys = Vec::new();
            while keys.len() < MAX_OBJECTS_PER_SEGMENT {
                let Some((key, record)) = records.pop() else { break };
                segment.perceived_objects.push(record);
                if self.codec.encoded_size(&segment) > self.mtu {
                    if let Some(record) = segment.perceived_objects.pop() {
                        records.push((key, record));
                    }
                    break;
                }
                keys.push(key);
            }

            if keys.is_empty() {
                let mut alone = self.segment_template(template);
                if let Some((_, record)) = records.last() {
                    alone.perceived_objects.push(record.clone());
                }
                return Err(CpmError::ExceedsMtu {
                    what: "perceived object",
                    size: self.codec.encoded_size(&alone),
                    mtu: self.mtu,
                });
            }

            if let Some(sic) = pending_sic.take() {
                segment.sensor_information = Some(sic);
                if self.codec.encoded_size(&segment) > self.mtu {
                    pending_sic = segment.sensor_information.take();
                } else {
                    sic_segment = Some(segments.len());
                }
            }
            segments.push((segment, keys));
        }

        if let Some(sic) = pending_sic {
            let mut segment = self.segment_template(template);
            segment.sensor_information = Some(sic);
            let size = self.codec.encoded_size(&segment);
            if size > self.mtu {
                return Err(CpmError::ExceedsMtu {
                    what: "sensor information container",
                    size,
                    mtu: self.mtu,
                });
            }
            sic_segment = Some(segments.len());
            segments.push((segment, Vec::new()));
        }

        if segments.is_empty() {
            // Nothing to distribute, yet the bare message did not fit.
            let bare = self.segment_template(template);
            return Err(CpmError::ExceedsMtu {
                what: "empty CPM",
                size: self.codec.encoded_size(&bare),
                mtu: self.mtu,
            });
        }

        let mut dropped_records = 0;
        if segments.len() > MAX_SEGMENTS {
            error!(excess = segments.len() - MAX_SEGMENTS, "number of CPM segments exceeds maximum, capping");
            dropped_records = segments[MAX_SEGMENTS..].iter().map(|(_, keys)| keys.len()).sum();
            segments.truncate(MAX_SEGMENTS);
            if sic_segment.is_some_and(|i| i >= MAX_SEGMENTS) {
                sic_segment = None;
            }
        }

        let total = segments.len() as u8;
        let mut messages = Vec::with_capacity(segments.len());
        let mut included = Vec::new();
        for (i, (mut segment, keys)) in segments.into_iter().enumerate() {
            segment.management.segment_info = Some(SegmentInfo {
                total_msg_segments: total,
                this_segment_num: i as u8 + 1,
            });
            messages.push(segment);
            included.extend(keys);
        }
        debug!(segments = total, objects = included.len(), "segmented CPM");

        Ok(Segmentation {
            messages,
            included,
            sensor_information_segment: sic_segment.map(|i| i as u8 + 1),
            dropped_records,
        })
    }

    /// `template` marked as a segment; the final numbering is stamped later
    /// and has the same encoded size.
    fn segment_template(&self, template: &CollectivePerceptionMessage) -> CollectivePerceptionMessage {
        let mut segment = template.clone();
        segment.management.segment_info = Some(SegmentInfo {
            total_msg_segments: 1,
            this_segment_num: 1,
        });
        segment
    }
}
